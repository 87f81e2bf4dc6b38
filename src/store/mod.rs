//! Append-only persistence of location reports.
//!
//! Every backend assigns `id` and `recorded_at` itself, inside one critical
//! section, so ids are unique and strictly increasing and timestamps never go
//! backwards in id order. Reads never take the write section.

use async_trait::async_trait;

use crate::error::{TrackerResult, ValidationError};
use crate::models::{LocationReport, NewLocation};

pub mod memory;
pub mod postgres;

pub use memory::MemoryLocationStore;
pub use postgres::PgLocationStore;

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Persists `location` and returns it with its assigned `id` and timestamp.
    /// The record is committed and visible to later reads before this returns.
    async fn append(&self, location: NewLocation) -> TrackerResult<LocationReport>;

    /// Highest-id report, for one bus or across all buses.
    async fn latest(&self, bus_id: Option<&str>) -> TrackerResult<Option<LocationReport>>;

    /// Up to `limit` most recent reports in ascending id order.
    /// A `limit` below 1 is a validation error.
    async fn history(&self, limit: i64, bus_id: Option<&str>) -> TrackerResult<Vec<LocationReport>>;
}

pub(crate) fn check_limit(limit: i64) -> Result<usize, ValidationError> {
    usize::try_from(limit)
        .ok()
        .filter(|l| *l > 0)
        .ok_or(ValidationError::NonPositiveLimit)
}
