use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ErrorBody;
use super::AppState;
use crate::config::ServiceSettings;
use crate::error::{TrackerError, TrackerResult, ValidationError};
use crate::mirror::MirrorSettings;
use crate::models::{LocationReport, LocationUpdate};
use crate::processor::location_processor;

/// Largest accepted JSON body. A location fix is a few hundred bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub status: &'static str,
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "busId")]
    pub bus_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<LocationReport> for UpdateResponse {
    fn from(report: LocationReport) -> Self {
        Self {
            status: "updated",
            id: report.id,
            latitude: report.latitude,
            longitude: report.longitude,
            bus_id: report.bus_id,
            speed: report.speed,
            accuracy: report.accuracy,
            bearing: report.bearing,
            timestamp: report.recorded_at,
        }
    }
}

/// A position as the map frontend consumes it.
#[derive(Debug, Serialize)]
pub struct PointResponse {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PointResponse {
    /// Returned by `latest` when nothing has been stored yet.
    fn empty() -> Self {
        Self {
            lat: 0.0,
            lng: 0.0,
            timestamp: None,
        }
    }
}

impl From<&LocationReport> for PointResponse {
    fn from(report: &LocationReport) -> Self {
        Self {
            lat: report.latitude,
            lng: report.longitude,
            timestamp: Some(report.recorded_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub locations: Vec<PointResponse>,
}

#[derive(Debug, Deserialize)]
pub struct BusQuery {
    #[serde(default, rename = "busId", alias = "bus_id")]
    pub bus_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default, rename = "busId", alias = "bus_id")]
    pub bus_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MirrorInitRequest {
    #[serde(default, rename = "databaseURL", alias = "databaseUrl", alias = "database_url")]
    pub database_url: Option<String>,
    #[serde(default, rename = "authToken", alias = "auth_token")]
    pub auth_token: Option<String>,
    #[serde(default, rename = "busId", alias = "bus_id")]
    pub bus_id: Option<String>,
}

fn bus_filter(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|b| !b.is_empty())
}

pub fn parse_limit(raw: Option<&str>, settings: &ServiceSettings) -> Result<i64, ValidationError> {
    let max = settings.history_max_limit;
    match raw {
        None => Ok(settings.history_default_limit),
        Some(v) => v
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|l| (1..=max).contains(l))
            .ok_or(ValidationError::InvalidLimit { max }),
    }
}

/// An empty body means "use the configured sink".
fn parse_init_request(body: &[u8], default_bus_id: &str) -> Result<Option<MirrorSettings>, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: MirrorInitRequest = serde_json::from_slice(body).map_err(|e| {
        warn!("Failed to parse mirror init request: {}", e);
        ValidationError::MalformedRequest
    })?;

    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    Ok(non_empty(request.database_url).map(|database_url| MirrorSettings {
        database_url,
        auth_token: non_empty(request.auth_token),
        bus_id: non_empty(request.bus_id).unwrap_or_else(|| default_bus_id.to_string()),
    }))
}

/// Collects a request body of at most `max` bytes.
async fn read_body(mut payload: web::Payload, max: usize) -> Result<web::BytesMut, ValidationError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Failed to read request body: {}", e);
            ValidationError::MalformedRequest
        })?;
        if body.len() + chunk.len() > max {
            warn!("Rejected request body over {} bytes", max);
            return Err(ValidationError::BodyTooLarge { max });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

pub async fn update_location(state: web::Data<AppState>, payload: web::Payload) -> TrackerResult<HttpResponse> {
    let body = read_body(payload, MAX_BODY_BYTES).await?;
    let update: LocationUpdate = serde_json::from_slice(&body).map_err(|e| {
        warn!("Failed to parse location update: {}", e);
        ValidationError::MalformedRequest
    })?;

    let report = location_processor::process_update(
        state.store.as_ref(),
        &state.mirror,
        update,
        &state.settings.default_bus_id,
    )
    .await?;

    Ok(HttpResponse::Ok().json(UpdateResponse::from(report)))
}

pub async fn latest_location(
    state: web::Data<AppState>,
    query: web::Query<BusQuery>,
) -> TrackerResult<HttpResponse> {
    let latest = state.store.latest(bus_filter(&query.bus_id)).await?;
    let body = latest.as_ref().map_or_else(PointResponse::empty, PointResponse::from);
    Ok(HttpResponse::Ok().json(body))
}

pub async fn location_history(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> TrackerResult<HttpResponse> {
    let limit = parse_limit(query.limit.as_deref(), &state.settings)?;
    let reports = state.store.history(limit, bus_filter(&query.bus_id)).await?;

    Ok(HttpResponse::Ok().json(HistoryResponse {
        locations: reports.iter().map(PointResponse::from).collect(),
    }))
}

pub async fn mirror_latest(state: web::Data<AppState>, query: web::Query<BusQuery>) -> TrackerResult<HttpResponse> {
    let bus_id = bus_filter(&query.bus_id).unwrap_or(state.settings.default_bus_id.as_str());

    match state.mirror.read_latest(bus_id).await? {
        Some(record) => Ok(HttpResponse::Ok().json(record)),
        None => Ok(HttpResponse::NotFound().json(ErrorBody::new("no location found"))),
    }
}

pub async fn mirror_init(state: web::Data<AppState>, payload: web::Payload) -> TrackerResult<HttpResponse> {
    let body = read_body(payload, MAX_BODY_BYTES).await?;
    let requested = parse_init_request(&body, &state.settings.default_bus_id)?;

    match state.mirror.initialize(state.store.clone(), requested).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "initialized and listening" }))),
        Err(TrackerError::Adapter(_)) => {
            Ok(HttpResponse::InternalServerError().json(ErrorBody::new("mirror initialization failed")))
        }
        Err(e) => Err(e),
    }
}
