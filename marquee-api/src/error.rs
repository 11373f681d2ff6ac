use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use marquee_booking::client::ErrorBody;
use marquee_core::SagaError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    SeatUnavailable { message: String, seats: Vec<String> },
    SessionExpired { message: String, seats: Vec<String> },
    ServiceUnavailable(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, body("UNAUTHENTICATED", msg)),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, body("FORBIDDEN", msg)),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, body("INVALID_REQUEST", msg)),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, body("NOT_FOUND", msg)),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, body("INVALID_STATE", msg)),
            AppError::SeatUnavailable { message, seats } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    unavailable_seats: Some(seats),
                    ..body("SEAT_UNAVAILABLE", message)
                },
            ),
            AppError::SessionExpired { message, seats } => (
                StatusCode::GONE,
                ErrorBody {
                    missing_seats: Some(seats),
                    ..body("SESSION_EXPIRED", message)
                },
            ),
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Downstream unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, body("UNAVAILABLE", "Service temporarily unavailable".to_string()))
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, body("INTERNAL", "Internal Server Error".to_string()))
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, body("INTERNAL", "Internal Server Error".to_string()))
            }
        };

        (status, Json(body)).into_response()
    }
}

fn body(code: &str, error: String) -> ErrorBody {
    ErrorBody {
        error,
        code: Some(code.to_string()),
        ..Default::default()
    }
}

impl From<SagaError> for AppError {
    fn from(err: SagaError) -> Self {
        let message = err.to_string();
        match err {
            SagaError::SeatUnavailable { seats, .. } => AppError::SeatUnavailable { message, seats },
            SagaError::LockNotFound { seats, .. } => AppError::SessionExpired {
                message: format!("Session expired, please select seats again ({})", message),
                seats,
            },
            SagaError::InvalidTransition { .. } | SagaError::AlreadyTerminal { .. } => AppError::ConflictError(message),
            SagaError::BookingNotFound(_) => AppError::NotFoundError(message),
            SagaError::Forbidden(_) => AppError::AuthorizationError(message),
            SagaError::Validation(_) => AppError::ValidationError(message),
            SagaError::DownstreamUnavailable(_) => AppError::ServiceUnavailable(message),
            SagaError::Store(_) | SagaError::EventDelivery(_) => AppError::InternalServerError(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
