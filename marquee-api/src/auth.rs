use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use marquee_core::Role;
use serde::Serialize;
use uuid::Uuid;

use crate::{error::AppError, middleware::auth::Claims, state::AppState, state::AuthConfig};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: String,
    /// Holder id the guest's seat locks are taken under
    session_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/guest", post(login_guest))
}

/// Signs a token for `subject`; also used by operators and tests to mint tokens.
pub fn issue_token(auth: &AuthConfig, subject: &str, role: Role) -> Result<String, AppError> {
    let claims = Claims {
        sub: subject.to_string(),
        role,
        exp: (Utc::now() + Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
}

async fn login_guest(State(state): State<AppState>) -> Result<Json<AuthResponse>, AppError> {
    let session_id = format!("guest-{}", Uuid::new_v4());
    let token = issue_token(&state.auth, &session_id, Role::Guest)?;
    Ok(Json(AuthResponse { token, session_id }))
}
