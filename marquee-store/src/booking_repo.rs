use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{Booking, BookingRepository, BookingStatus, SagaError, SagaResult};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    showtime_id: String,
    user_id: Option<String>,
    holder_id: String,
    seat_ids: Vec<String>,
    total_amount: i64,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = SagaError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            showtime_id: row.showtime_id,
            user_id: row.user_id,
            holder_id: row.holder_id,
            seat_ids: row.seat_ids,
            total_amount: row.total_amount,
            currency: row.currency,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_BOOKING: &str = r#"
    SELECT id, showtime_id, user_id, holder_id, seat_ids, total_amount, currency, status, created_at, updated_at
    FROM bookings
"#;

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> SagaResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, showtime_id, user_id, holder_id, seat_ids, total_amount, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.showtime_id)
        .bind(&booking.user_id)
        .bind(&booking.holder_id)
        .bind(&booking.seat_ids)
        .bind(booking.total_amount)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(SagaError::store)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> SagaResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("{} WHERE id = $1", SELECT_BOOKING))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SagaError::store)?;

        row.map(Booking::try_from).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> SagaResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(SagaError::store)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_active_by_seats(&self, showtime_id: &str, seat_ids: &[String]) -> SagaResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{} WHERE showtime_id = $1 AND status IN ('SEAT_LOCKED', 'AWAITING_PAYMENT') AND seat_ids && $2::text[] ORDER BY created_at",
            SELECT_BOOKING
        ))
        .bind(showtime_id)
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(SagaError::store)?;

        rows.into_iter().map(Booking::try_from).collect()
    }
}
