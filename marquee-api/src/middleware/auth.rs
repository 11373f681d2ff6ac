use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, DecodingKey, Validation};
use marquee_booking::INTERNAL_SECRET_HEADER;
use marquee_core::{RequestContext, Role};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

// ============================================================================
// Bearer Authentication Middleware
// ============================================================================

/// Resolves the bearer token into a [`RequestContext`] that handlers take as an
/// `Extension`; nothing about the caller is kept outside the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // 1. Extract token from Authorization header
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    // 2. Decode and validate JWT
    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::AuthenticationError(format!("Invalid token: {}", e)))?;

    // 3. Inject request context
    let ctx = RequestContext::new(token_data.claims.sub, token_data.claims.role);
    tracing::debug!(request_id = %ctx.request_id, subject = %ctx.subject, "Authenticated request");
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

// ============================================================================
// Internal Service Authentication
// ============================================================================

pub async fn internal_secret_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::AuthenticationError("Missing internal secret".to_string()))?;

    if provided != state.auth.internal_secret {
        return Err(AppError::AuthorizationError("Invalid internal secret".to_string()));
    }

    Ok(next.run(req).await)
}
