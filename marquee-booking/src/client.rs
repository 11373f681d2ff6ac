use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{SagaError, SagaResult, UnlockReason};
use marquee_showtime::{hold_duration, SeatLockService};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Header carrying the shared secret on service-to-service calls.
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// The booking side's view of the Seat Lock Service.
#[async_trait]
pub trait SeatLockClient: Send + Sync {
    async fn extend(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        holder_id: &str,
        ttl_seconds: u64,
    ) -> SagaResult<DateTime<Utc>>;

    async fn bind_holder(
        &self,
        booking_id: Uuid,
        showtime_id: &str,
        seat_ids: &[String],
        from_holder: &str,
    ) -> SagaResult<()>;

    async fn release(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        reason: UnlockReason,
        holder_id: Option<&str>,
    ) -> SagaResult<Vec<String>>;
}

/// Calls the service in the same process.
pub struct LocalSeatLockClient {
    service: Arc<SeatLockService>,
}

impl LocalSeatLockClient {
    pub fn new(service: Arc<SeatLockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl SeatLockClient for LocalSeatLockClient {
    async fn extend(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        holder_id: &str,
        ttl_seconds: u64,
    ) -> SagaResult<DateTime<Utc>> {
        let ttl = hold_duration(ttl_seconds)?;
        self.service.extend(showtime_id, seat_ids, Some(holder_id), ttl).await
    }

    async fn bind_holder(
        &self,
        booking_id: Uuid,
        showtime_id: &str,
        seat_ids: &[String],
        from_holder: &str,
    ) -> SagaResult<()> {
        self.service
            .bind_holder(booking_id, showtime_id, seat_ids, Some(from_holder))
            .await
    }

    async fn release(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        reason: UnlockReason,
        holder_id: Option<&str>,
    ) -> SagaResult<Vec<String>> {
        self.service.release(showtime_id, seat_ids, reason, holder_id).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLocksRequest {
    pub seat_ids: Vec<String>,
    pub ttl_seconds: u64,
    pub holder_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLocksResponse {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindLocksRequest {
    pub booking_id: Uuid,
    pub seat_ids: Vec<String>,
    pub from_holder: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseLocksRequest {
    pub seat_ids: Vec<String>,
    pub reason: UnlockReason,
    #[serde(default)]
    pub holder_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseLocksResponse {
    pub released: Vec<String>,
}

/// Error body returned by the API for failed requests.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_seats: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_seats: Option<Vec<String>>,
}

/// Calls a remote showtime service over its internal endpoints.
pub struct HttpSeatLockClient {
    http: reqwest::Client,
    base_url: String,
    internal_secret: String,
}

impl HttpSeatLockClient {
    pub fn new(base_url: &str, internal_secret: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_secret: internal_secret.to_string(),
        })
    }

    fn url(&self, showtime_id: &str, action: &str) -> String {
        format!("{}/internal/showtimes/{}/locks/{}", self.base_url, showtime_id, action)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        showtime_id: &str,
        action: &str,
        body: &B,
    ) -> SagaResult<reqwest::Response> {
        let response = self
            .http
            .post(self.url(showtime_id, action))
            .header(INTERNAL_SECRET_HEADER, &self.internal_secret)
            .json(body)
            .send()
            .await
            .map_err(|e| SagaError::DownstreamUnavailable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        warn!(showtime_id, action, %status, error = %body.error, "Seat lock call failed");
        Err(map_error(showtime_id, status, body))
    }
}

fn map_error(showtime_id: &str, status: StatusCode, body: ErrorBody) -> SagaError {
    match status {
        StatusCode::CONFLICT => SagaError::SeatUnavailable {
            showtime_id: showtime_id.to_string(),
            seats: body.unavailable_seats.unwrap_or_default(),
        },
        StatusCode::GONE => SagaError::LockNotFound {
            showtime_id: showtime_id.to_string(),
            seats: body.missing_seats.unwrap_or_default(),
        },
        StatusCode::BAD_REQUEST => SagaError::Validation(body.error),
        other => SagaError::DownstreamUnavailable(format!("Seat lock service returned {}: {}", other, body.error)),
    }
}

#[async_trait]
impl SeatLockClient for HttpSeatLockClient {
    async fn extend(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        holder_id: &str,
        ttl_seconds: u64,
    ) -> SagaResult<DateTime<Utc>> {
        let request = ExtendLocksRequest {
            seat_ids: seat_ids.to_vec(),
            ttl_seconds,
            holder_id: holder_id.to_string(),
        };
        let response: ExtendLocksResponse = self
            .post(showtime_id, "extend", &request)
            .await?
            .json()
            .await
            .map_err(|e| SagaError::DownstreamUnavailable(e.to_string()))?;
        Ok(response.expires_at)
    }

    async fn bind_holder(
        &self,
        booking_id: Uuid,
        showtime_id: &str,
        seat_ids: &[String],
        from_holder: &str,
    ) -> SagaResult<()> {
        let request = BindLocksRequest {
            booking_id,
            seat_ids: seat_ids.to_vec(),
            from_holder: Some(from_holder.to_string()),
        };
        self.post(showtime_id, "bind", &request).await?;
        Ok(())
    }

    async fn release(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        reason: UnlockReason,
        holder_id: Option<&str>,
    ) -> SagaResult<Vec<String>> {
        let request = ReleaseLocksRequest {
            seat_ids: seat_ids.to_vec(),
            reason,
            holder_id: holder_id.map(str::to_string),
        };
        let response: ReleaseLocksResponse = self
            .post(showtime_id, "release", &request)
            .await?
            .json()
            .await
            .map_err(|e| SagaError::DownstreamUnavailable(e.to_string()))?;
        Ok(response.released)
    }
}
