//! Best-effort copy of reports into an external real-time sink.
//!
//! The handle is created once at startup and injected into the HTTP state. It
//! walks `Unconfigured -> Initializing -> Ready` (or `FailedInit`, which a later
//! `initialize` call may retry). Only `Ready` forwards or reads; the other
//! states drop forwards silently and answer reads with `NotConfigured`.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AdapterError, TrackerError, TrackerResult};
use crate::models::{LocationReport, LocationUpdate};
use crate::processor::location_processor;
use crate::store::LocationStore;

pub mod firebase;
mod listener;

#[cfg(test)]
pub(crate) mod fake;

pub use firebase::FirebaseSink;

/// Where the sink lives and which bus the listener follows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MirrorSettings {
    pub database_url: String,
    pub auth_token: Option<String>,
    pub bus_id: String,
}

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Upper bound for a single forward, read or probe.
    pub request_timeout: Duration,
    /// Consecutive listener failures before the circuit breaker trips.
    pub max_retries: u32,
    pub cooldown: Duration,
    pub reconnect_delay: Duration,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_retries: 5,
            cooldown: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Unconfigured,
    Initializing,
    Ready,
    FailedInit,
}

/// Location as stored in the sink under `locations/{busId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub lat: f64,
    pub lng: f64,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(default, rename = "busId", skip_serializing_if = "Option::is_none")]
    pub bus_id: Option<String>,
    /// Local store id of the forwarded report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Instance id of the process that wrote the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MirrorRecord {
    pub fn from_report(report: &LocationReport, source: Uuid) -> Self {
        Self {
            lat: report.latitude,
            lng: report.longitude,
            timestamp: Some(report.recorded_at.timestamp_millis()),
            last_updated: Some(report.recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            speed: report.speed,
            accuracy: report.accuracy,
            bearing: report.bearing,
            bus_id: Some(report.bus_id.clone()),
            id: Some(report.id),
            source: Some(source.to_string()),
        }
    }

    /// Decodes whatever a producer left in the sink, accepting the same loose
    /// numeric forms as the ingest endpoint.
    pub fn from_value(value: Value, bus_id: &str) -> Result<Self, AdapterError> {
        let update: LocationUpdate =
            serde_json::from_value(value.clone()).map_err(|e| AdapterError::Decode(e.to_string()))?;
        let location = location_processor::normalize(update, bus_id)
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        Ok(Self {
            lat: location.latitude,
            lng: location.longitude,
            timestamp: value.get("timestamp").and_then(Value::as_i64),
            last_updated: value
                .get("last_updated")
                .and_then(Value::as_str)
                .map(str::to_string),
            speed: location.speed,
            accuracy: location.accuracy,
            bearing: location.bearing,
            bus_id: Some(location.bus_id),
            id: value.get("id").and_then(Value::as_i64),
            source: value.get("source").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// One server-sent event from the sink's streaming endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    /// The sink ended the subscription (`cancel`, `auth_revoked`).
    Cancelled(String),
}

pub type SinkEventStream = BoxStream<'static, Result<SinkEvent, AdapterError>>;

#[async_trait]
pub trait MirrorSink: Send + Sync {
    /// Cheap request proving the sink is reachable and accepts our credentials.
    async fn probe(&self, bus_id: &str) -> Result<(), AdapterError>;

    async fn put_latest(&self, bus_id: &str, record: &MirrorRecord) -> Result<(), AdapterError>;

    async fn get_latest(&self, bus_id: &str) -> Result<Option<MirrorRecord>, AdapterError>;

    async fn subscribe(&self, bus_id: &str) -> Result<SinkEventStream, AdapterError>;
}

pub type SinkConnector =
    Arc<dyn Fn(&MirrorSettings, &MirrorOptions) -> Result<Arc<dyn MirrorSink>, AdapterError> + Send + Sync>;

enum Phase {
    Unconfigured,
    Initializing,
    Ready(Arc<dyn MirrorSink>),
    FailedInit,
}

struct MirrorInner {
    instance_id: Uuid,
    defaults: Option<MirrorSettings>,
    options: MirrorOptions,
    connect: SinkConnector,
    phase: RwLock<Phase>,
    init_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<listener::ListenerTask>>,
    runtime: Handle,
}

/// Cloneable handle to the process-wide mirror. Must be created inside a
/// Tokio runtime; background work is spawned onto that runtime so it outlives
/// individual HTTP workers.
#[derive(Clone)]
pub struct MirrorHandle {
    inner: Arc<MirrorInner>,
}

impl MirrorHandle {
    pub fn new(defaults: Option<MirrorSettings>, options: MirrorOptions) -> Self {
        let connect: SinkConnector = Arc::new(
            |settings: &MirrorSettings, options: &MirrorOptions| -> Result<Arc<dyn MirrorSink>, AdapterError> {
                Ok(Arc::new(FirebaseSink::new(settings, options)?))
            },
        );
        Self::with_connector(defaults, options, connect)
    }

    /// A handle with no default sink; it stays unconfigured unless initialised
    /// with explicit settings.
    pub fn disabled() -> Self {
        Self::new(None, MirrorOptions::default())
    }

    pub fn with_connector(
        defaults: Option<MirrorSettings>,
        options: MirrorOptions,
        connect: SinkConnector,
    ) -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                instance_id: Uuid::new_v4(),
                defaults,
                options,
                connect,
                phase: RwLock::new(Phase::Unconfigured),
                init_lock: tokio::sync::Mutex::new(()),
                listener: Mutex::new(None),
                runtime: Handle::current(),
            }),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn state(&self) -> MirrorState {
        match *self.inner.phase.read().unwrap_or_else(PoisonError::into_inner) {
            Phase::Unconfigured => MirrorState::Unconfigured,
            Phase::Initializing => MirrorState::Initializing,
            Phase::Ready(_) => MirrorState::Ready,
            Phase::FailedInit => MirrorState::FailedInit,
        }
    }

    fn set_phase(&self, phase: Phase) {
        *self.inner.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn ready_sink(&self) -> Option<Arc<dyn MirrorSink>> {
        match &*self.inner.phase.read().unwrap_or_else(PoisonError::into_inner) {
            Phase::Ready(sink) => Some(sink.clone()),
            _ => None,
        }
    }

    /// Connects to the sink and starts the listener that copies external
    /// fixes into `store`. Concurrent callers are serialised; once `Ready`,
    /// further calls succeed without touching the sink again.
    pub async fn initialize(
        &self,
        store: Arc<dyn LocationStore>,
        requested: Option<MirrorSettings>,
    ) -> TrackerResult<()> {
        let _guard = self.inner.init_lock.lock().await;

        if self.state() == MirrorState::Ready {
            info!("Mirror already initialized, nothing to do");
            return Ok(());
        }

        let settings = requested
            .or_else(|| self.inner.defaults.clone())
            .ok_or(TrackerError::NotConfigured)?;

        self.set_phase(Phase::Initializing);
        info!("Initializing mirror at {} for {}", settings.database_url, settings.bus_id);

        let sink = match self.connect(&settings).await {
            Ok(sink) => sink,
            Err(e) => {
                error!("Mirror initialization failed: {}", e);
                self.set_phase(Phase::FailedInit);
                return Err(e.into());
            }
        };

        self.set_phase(Phase::Ready(sink.clone()));
        info!("Mirror ready");

        let task = listener::spawn(
            &self.inner.runtime,
            listener::ListenerContext {
                sink,
                store,
                bus_id: settings.bus_id,
                instance_id: self.inner.instance_id,
                options: self.inner.options.clone(),
            },
        );
        let previous = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(stale) = previous {
            stale.stop();
        }

        Ok(())
    }

    async fn connect(&self, settings: &MirrorSettings) -> Result<Arc<dyn MirrorSink>, AdapterError> {
        let sink = (self.inner.connect)(settings, &self.inner.options)?;
        tokio::time::timeout(self.inner.options.request_timeout, sink.probe(&settings.bus_id))
            .await
            .map_err(|_| AdapterError::Timeout)??;
        Ok(sink)
    }

    /// Fire-and-forget copy of a stored report. Returns immediately; failures
    /// are logged on the background task.
    pub fn forward(&self, report: &LocationReport) {
        let Some(sink) = self.ready_sink() else {
            return;
        };

        let record = MirrorRecord::from_report(report, self.inner.instance_id);
        let bus_id = report.bus_id.clone();
        let timeout = self.inner.options.request_timeout;

        self.inner.runtime.spawn(async move {
            match tokio::time::timeout(timeout, sink.put_latest(&bus_id, &record)).await {
                Ok(Ok(())) => debug!("Mirrored location for {}: {}, {}", bus_id, record.lat, record.lng),
                Ok(Err(e)) => warn!("Failed to mirror location for {}: {}", bus_id, e),
                Err(_) => warn!("Mirroring location for {} timed out", bus_id),
            }
        });
    }

    /// Latest record held by the sink itself, bypassing the local store.
    /// Sink failures read as "no data"; only a non-ready mirror is an error.
    pub async fn read_latest(&self, bus_id: &str) -> TrackerResult<Option<MirrorRecord>> {
        let sink = self.ready_sink().ok_or(TrackerError::NotConfigured)?;

        match tokio::time::timeout(self.inner.options.request_timeout, sink.get_latest(bus_id)).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => {
                warn!("Error getting location for {} from mirror: {}", bus_id, e);
                Ok(None)
            }
            Err(_) => {
                warn!("Reading location for {} from mirror timed out", bus_id);
                Ok(None)
            }
        }
    }

    /// Stops the listener and waits for it, letting any append it has started
    /// finish first.
    pub async fn shutdown(&self) {
        let task = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            info!("Stopping mirror listener...");
            task.join().await;
        }
    }
}

#[cfg(test)]
mod tests;
