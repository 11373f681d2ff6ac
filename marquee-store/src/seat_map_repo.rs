use async_trait::async_trait;
use marquee_core::{SagaError, SagaResult, SeatMapRepository};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgSeatMapRepository {
    pool: PgPool,
}

impl PgSeatMapRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeatMapRepository for PgSeatMapRepository {
    async fn mark_booked(&self, showtime_id: &str, seat_ids: &[String], booking_id: Uuid) -> SagaResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(SagaError::store)?;

        // Re-marking by the same booking is a no-op thanks to the primary key.
        sqlx::query(
            r#"
            INSERT INTO booked_seats (showtime_id, seat_id, booking_id)
            SELECT $1, seat, $3 FROM unnest($2::text[]) AS seat
            ON CONFLICT (showtime_id, seat_id) DO NOTHING
            "#,
        )
        .bind(showtime_id)
        .bind(seat_ids)
        .bind(booking_id)
        .execute(&mut *tx)
        .await
        .map_err(SagaError::store)?;

        let conflicts = sqlx::query_scalar::<_, String>(
            r#"
            SELECT seat_id FROM booked_seats
            WHERE showtime_id = $1 AND seat_id = ANY($2) AND booking_id <> $3
            ORDER BY seat_id
            "#,
        )
        .bind(showtime_id)
        .bind(seat_ids)
        .bind(booking_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(SagaError::store)?;

        tx.commit().await.map_err(SagaError::store)?;
        Ok(conflicts)
    }

    async fn booked_seats(&self, showtime_id: &str, seat_ids: &[String]) -> SagaResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT seat_id FROM booked_seats WHERE showtime_id = $1 AND seat_id = ANY($2) ORDER BY seat_id",
        )
        .bind(showtime_id)
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(SagaError::store)
    }
}
