use axum::{
    extract::State,
    http::{Method, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod bookings;
pub mod bootstrap;
pub mod error;
pub mod internal;
pub mod middleware;
pub mod showtimes;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let authenticated = Router::new()
        .merge(showtimes::routes())
        .merge(bookings::routes())
        .route_layer(from_fn_with_state(state.clone(), middleware::auth::auth_middleware));

    let internal = internal::routes()
        .route_layer(from_fn_with_state(state.clone(), middleware::auth::internal_secret_middleware));

    Router::new()
        .merge(auth::routes())
        .merge(authenticated)
        .merge(internal)
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match &state.redis {
        Some(redis) => match redis.ping().await {
            Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "redis": "up" }))),
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "degraded", "redis": "down" })))
            }
        },
        None => (StatusCode::OK, Json(json!({ "status": "ok" }))),
    }
}
