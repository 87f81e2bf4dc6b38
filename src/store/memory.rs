use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use super::{check_limit, LocationStore};
use crate::error::{StorageError, TrackerResult};
use crate::models::{LocationReport, NewLocation};

/// Reports per sealed chunk.
const CHUNK_LEN: usize = 512;

/// Immutable view of the log at one point in time. Sealed chunks are never
/// touched again; the tail is copied on write only while a reader holds it.
#[derive(Clone, Default)]
struct Snapshot {
    sealed: Arc<Vec<Arc<Vec<LocationReport>>>>,
    tail: Arc<Vec<LocationReport>>,
}

impl Snapshot {
    fn last(&self) -> Option<&LocationReport> {
        self.tail
            .last()
            .or_else(|| self.sealed.last().and_then(|chunk| chunk.last()))
    }

    /// Newest first.
    fn iter_rev(&self) -> impl Iterator<Item = &LocationReport> {
        self.tail
            .iter()
            .rev()
            .chain(self.sealed.iter().rev().flat_map(|chunk| chunk.iter().rev()))
    }
}

/// Process-local store kept in id order. Used when `STORE_BACKEND=memory` and
/// in tests.
///
/// The lock covers id assignment and the push on the write side, and two `Arc`
/// clones on the read side. Scans run on the cloned snapshot with no lock held.
#[derive(Default)]
pub struct MemoryLocationStore {
    log: Mutex<Snapshot>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Result<Snapshot, StorageError> {
        Ok(self.log.lock().map_err(|_| StorageError::Poisoned)?.clone())
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn append(&self, location: NewLocation) -> TrackerResult<LocationReport> {
        let mut log = self.log.lock().map_err(|_| StorageError::Poisoned)?;

        let (id, recorded_at) = match log.last() {
            Some(prev) => (prev.id + 1, Utc::now().max(prev.recorded_at)),
            None => (1, Utc::now()),
        };
        let report = location.into_report(id, recorded_at);
        Arc::make_mut(&mut log.tail).push(report.clone());

        if log.tail.len() >= CHUNK_LEN {
            let full = std::mem::take(&mut log.tail);
            Arc::make_mut(&mut log.sealed).push(full);
        }

        Ok(report)
    }

    async fn latest(&self, bus_id: Option<&str>) -> TrackerResult<Option<LocationReport>> {
        let snapshot = self.snapshot()?;

        let latest = snapshot
            .iter_rev()
            .find(|r| bus_id.map_or(true, |b| r.bus_id == b))
            .cloned();
        Ok(latest)
    }

    async fn history(&self, limit: i64, bus_id: Option<&str>) -> TrackerResult<Vec<LocationReport>> {
        let limit = check_limit(limit)?;
        let snapshot = self.snapshot()?;

        let mut recent: Vec<LocationReport> = snapshot
            .iter_rev()
            .filter(|r| bus_id.map_or(true, |b| r.bus_id == b))
            .take(limit)
            .cloned()
            .collect();

        recent.reverse();
        Ok(recent)
    }
}
