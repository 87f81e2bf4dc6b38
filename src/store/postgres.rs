use async_trait::async_trait;
use tracing::error;

use super::{check_limit, LocationStore};
use crate::db::{queries, DbPool};
use crate::error::{StorageError, TrackerError, TrackerResult};
use crate::models::{LocationReport, NewLocation};

/// Advisory lock key guarding the append section ("BUSLOCS" in ASCII).
const APPEND_LOCK_KEY: i64 = 0x0042_5553_4c4f_4353;

pub struct PgLocationStore {
    pool: DbPool,
}

impl PgLocationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn storage(e: sqlx::Error) -> TrackerError {
    error!("Location store query failed: {}", e);
    TrackerError::Storage(StorageError::Database(e))
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn append(&self, location: NewLocation) -> TrackerResult<LocationReport> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(queries::LOCK_APPEND)
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let report: LocationReport = sqlx::query_as(queries::INSERT_LOCATION)
            .bind(&location.bus_id)
            .bind(location.latitude)
            .bind(location.longitude)
            .bind(location.speed)
            .bind(location.accuracy)
            .bind(location.bearing)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        Ok(report)
    }

    async fn latest(&self, bus_id: Option<&str>) -> TrackerResult<Option<LocationReport>> {
        sqlx::query_as(queries::SELECT_LATEST)
            .bind(bus_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)
    }

    async fn history(&self, limit: i64, bus_id: Option<&str>) -> TrackerResult<Vec<LocationReport>> {
        check_limit(limit)?;

        sqlx::query_as(queries::SELECT_HISTORY)
            .bind(bus_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)
    }
}
