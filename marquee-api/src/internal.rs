use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use marquee_booking::client::{
    BindLocksRequest, ExtendLocksRequest, ExtendLocksResponse, ReleaseLocksRequest, ReleaseLocksResponse,
};
use marquee_showtime::hold_duration;

use crate::{error::AppError, state::AppState};

/// Service-to-service endpoints the booking side calls when it runs out of process.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/internal/showtimes/{showtime_id}/locks/extend", post(extend_locks))
        .route("/internal/showtimes/{showtime_id}/locks/bind", post(bind_locks))
        .route("/internal/showtimes/{showtime_id}/locks/release", post(release_locks))
}

async fn extend_locks(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Json(req): Json<ExtendLocksRequest>,
) -> Result<Json<ExtendLocksResponse>, AppError> {
    let ttl = hold_duration(req.ttl_seconds)?;
    let expires_at = state
        .seats
        .extend(&showtime_id, &req.seat_ids, Some(&req.holder_id), ttl)
        .await?;

    Ok(Json(ExtendLocksResponse { expires_at }))
}

async fn bind_locks(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Json(req): Json<BindLocksRequest>,
) -> Result<StatusCode, AppError> {
    state
        .seats
        .bind_holder(req.booking_id, &showtime_id, &req.seat_ids, req.from_holder.as_deref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn release_locks(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Json(req): Json<ReleaseLocksRequest>,
) -> Result<Json<ReleaseLocksResponse>, AppError> {
    let released = state
        .seats
        .release(&showtime_id, &req.seat_ids, req.reason, req.holder_id.as_deref())
        .await?;

    Ok(Json(ReleaseLocksResponse { released }))
}
