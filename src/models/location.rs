use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One persisted GPS fix. Immutable once the store has assigned `id` and
/// `recorded_at`.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct LocationReport {
    pub id: i64, // bigserial
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,    // km/h
    pub accuracy: Option<f64>, // meters
    pub bearing: Option<f64>,  // degrees
    pub recorded_at: DateTime<Utc>,
}

/// A validated report that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub bearing: Option<f64>,
}

impl NewLocation {
    pub fn new(bus_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            bus_id: bus_id.into(),
            latitude,
            longitude,
            speed: None,
            accuracy: None,
            bearing: None,
        }
    }

    pub fn into_report(self, id: i64, recorded_at: DateTime<Utc>) -> LocationReport {
        LocationReport {
            id,
            bus_id: self.bus_id,
            latitude: self.latitude,
            longitude: self.longitude,
            speed: self.speed,
            accuracy: self.accuracy,
            bearing: self.bearing,
            recorded_at,
        }
    }
}
