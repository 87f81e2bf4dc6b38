use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{MirrorOptions, MirrorSink, SinkEvent};
use crate::error::AdapterError;
use crate::models::LocationUpdate;
use crate::processor::location_processor;
use crate::store::LocationStore;

pub(super) struct ListenerContext {
    pub sink: Arc<dyn MirrorSink>,
    pub store: Arc<dyn LocationStore>,
    pub bus_id: String,
    pub instance_id: Uuid,
    pub options: MirrorOptions,
}

pub(super) struct ListenerTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ListenerTask {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn join(self) {
        self.stop();
        if let Err(e) = self.handle.await {
            error!("Mirror listener task failed: {}", e);
        }
    }
}

pub(super) fn spawn(runtime: &Handle, ctx: ListenerContext) -> ListenerTask {
    let (stop, shutdown) = watch::channel(false);
    let handle = runtime.spawn(run(ctx, shutdown));
    ListenerTask { stop, handle }
}

/// Sleeps for `delay` unless shutdown is requested first. Returns false on
/// shutdown.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

/// Follows the sink's event stream for one bus and copies every external fix
/// into the store, reconnecting with a circuit breaker on failures.
async fn run(ctx: ListenerContext, mut shutdown: watch::Receiver<bool>) {
    info!("Started listening for mirror updates for {}", ctx.bus_id);

    let mut consecutive_failures = 0;
    let max_retries = ctx.options.max_retries;
    // Sink value as of the last event seen, carried across reconnects.
    let mut last_seen: Option<Value> = None;

    'connect: loop {
        if *shutdown.borrow() {
            break;
        }

        // Circuit Breaker Check
        if consecutive_failures >= max_retries {
            warn!(
                "Mirror circuit breaker tripped ({} consecutive failures)! Sleeping for {:?}...",
                consecutive_failures, ctx.options.cooldown
            );
            if !pause(ctx.options.cooldown, &mut shutdown).await {
                break;
            }
            consecutive_failures = 0;
            info!("Mirror circuit breaker reset. Reconnecting.");
        }

        let subscribed = tokio::select! {
            r = ctx.sink.subscribe(&ctx.bus_id) => r,
            _ = shutdown.changed() => break,
        };
        let mut events = match subscribed {
            Ok(events) => events,
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Mirror subscribe error: {}. Failure count ({} / {})",
                    e, consecutive_failures, max_retries
                );
                if !pause(ctx.options.reconnect_delay, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        // The first event replays whatever is already in the sink.
        let mut snapshot_pending = true;

        loop {
            let next = tokio::select! {
                next = events.next() => next,
                _ = shutdown.changed() => break 'connect,
            };

            let failure = match next {
                Some(Ok(SinkEvent::Cancelled(reason))) => AdapterError::StreamClosed(reason),
                Some(Ok(SinkEvent::Put { path, data })) if snapshot_pending => {
                    consecutive_failures = 0;
                    snapshot_pending = false;
                    let previous = last_seen.replace(data.clone());
                    match previous {
                        Some(previous) if previous != data => {
                            info!("Catching up on mirror update missed while disconnected for {}", ctx.bus_id);
                            handle_event(&ctx, SinkEvent::Put { path, data }).await;
                        }
                        _ => debug!("Skipping mirror snapshot for {}", ctx.bus_id),
                    }
                    continue;
                }
                Some(Ok(event)) => {
                    consecutive_failures = 0;
                    remember(&mut last_seen, &event);
                    // Runs outside the select so shutdown never interrupts an append.
                    handle_event(&ctx, event).await;
                    continue;
                }
                Some(Err(e)) => e,
                None => AdapterError::StreamClosed("end of stream".to_string()),
            };

            consecutive_failures += 1;
            warn!(
                "Mirror stream for {} interrupted: {}. Failure count ({} / {})",
                ctx.bus_id, failure, consecutive_failures, max_retries
            );
            break;
        }

        if !pause(ctx.options.reconnect_delay, &mut shutdown).await {
            break;
        }
    }

    info!("Stopped listening for mirror updates for {}", ctx.bus_id);
}

/// Folds a live event into the remembered sink value.
fn remember(last_seen: &mut Option<Value>, event: &SinkEvent) {
    let (path, data, merge) = match event {
        SinkEvent::Put { path, data } => (path, data, false),
        SinkEvent::Patch { path, data } => (path, data, true),
        SinkEvent::KeepAlive | SinkEvent::Cancelled(_) => return,
    };

    match path.trim_matches('/') {
        "" => {
            if let (true, Some(Value::Object(current)), Value::Object(changes)) = (merge, last_seen.as_mut(), data) {
                current.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                return;
            }
            *last_seen = Some(data.clone());
        }
        key if !key.contains('/') => {
            if let Some(Value::Object(current)) = last_seen.as_mut() {
                current.insert(key.to_string(), data.clone());
            }
        }
        _ => {}
    }
}

async fn handle_event(ctx: &ListenerContext, event: SinkEvent) {
    let (path, data) = match event {
        SinkEvent::Put { path, data } | SinkEvent::Patch { path, data } => (path, data),
        SinkEvent::KeepAlive | SinkEvent::Cancelled(_) => return,
    };

    if path != "/" || !data.is_object() {
        debug!("Ignoring partial mirror update at {} for {}", path, ctx.bus_id);
        return;
    }

    let own = ctx.instance_id.to_string();
    if data.get("source").and_then(|s| s.as_str()) == Some(own.as_str()) {
        debug!("Ignoring mirror echo of our own update for {}", ctx.bus_id);
        return;
    }

    let update: LocationUpdate = match serde_json::from_value(data) {
        Ok(u) => u,
        Err(e) => {
            warn!("Failed to parse mirror update for {}: {}", ctx.bus_id, e);
            return;
        }
    };
    let location = match location_processor::normalize(update, &ctx.bus_id) {
        Ok(l) => l,
        Err(e) => {
            warn!("Invalid mirror update for {}: {}", ctx.bus_id, e);
            return;
        }
    };

    match ctx.store.append(location).await {
        Ok(report) => info!(
            "Location updated from mirror: {}, {} (id {})",
            report.latitude, report.longitude, report.id
        ),
        Err(e) => error!("Error storing mirror update for {}: {}", ctx.bus_id, e),
    }
}
