use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use marquee_core::{RequestContext, UnlockReason};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSelection {
    pub seat_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResponse {
    pub seat_ids: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub released: Vec<String>,
}

/// A hold as shown to a shopper; other shoppers' identities are not exposed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldView {
    pub seat_id: String,
    pub expires_at: DateTime<Utc>,
    pub held_by_you: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/v1/showtimes/{showtime_id}/locks",
        post(acquire_locks).delete(release_locks).get(list_locks),
    )
}

async fn acquire_locks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(showtime_id): Path<String>,
    Json(req): Json<SeatSelection>,
) -> Result<Json<LockResponse>, AppError> {
    let ttl = state.seats.settings().seat_hold;
    let grant = state
        .seats
        .acquire(&showtime_id, &req.seat_ids, ctx.holder_id(), ttl)
        .await?;

    info!(request_id = %ctx.request_id, showtime_id = %showtime_id, seats = ?grant.seat_ids, "Seats locked");

    Ok(Json(LockResponse {
        seat_ids: grant.seat_ids,
        expires_at: grant.expires_at,
    }))
}

async fn release_locks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(showtime_id): Path<String>,
    Json(req): Json<SeatSelection>,
) -> Result<Json<ReleaseResponse>, AppError> {
    // Shoppers can only drop their own holds.
    let released = state
        .seats
        .release(&showtime_id, &req.seat_ids, UnlockReason::Cancelled, Some(ctx.holder_id()))
        .await?;

    Ok(Json(ReleaseResponse { released }))
}

async fn list_locks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(showtime_id): Path<String>,
) -> Result<Json<Vec<HoldView>>, AppError> {
    let holds = state.seats.locks(&showtime_id).await?;

    Ok(Json(
        holds
            .into_iter()
            .map(|hold| HoldView {
                held_by_you: hold.holder_id == ctx.holder_id(),
                seat_id: hold.seat_id,
                expires_at: hold.expires_at,
            })
            .collect(),
    ))
}
