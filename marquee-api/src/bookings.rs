use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use marquee_booking::{NewBooking, PaymentHold};
use marquee_core::{Booking, RequestContext};
use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{booking_id}", get(get_booking))
        .route("/v1/bookings/{booking_id}/payment", post(initiate_payment))
        .route("/v1/bookings/{booking_id}/cancel", post(cancel_booking))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<NewBooking>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.bookings.create_booking(&ctx, req).await?;
    info!(request_id = %ctx.request_id, booking_id = %booking.id, "Booking created");
    Ok(Json(booking))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.get_booking(&ctx, booking_id).await?))
}

async fn initiate_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<PaymentHold>, AppError> {
    let hold = state.bookings.initiate_payment(&ctx, booking_id).await?;
    info!(
        request_id = %ctx.request_id,
        booking_id = %booking_id,
        hold_expires_at = %hold.hold_expires_at,
        "Payment initiated"
    );
    Ok(Json(hold))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.bookings.cancel_booking(&ctx, booking_id).await?;
    info!(request_id = %ctx.request_id, booking_id = %booking_id, "Booking cancelled");
    Ok(Json(booking))
}
