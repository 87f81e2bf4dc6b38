//! In-process sink for exercising the mirror without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;

use super::{
    MirrorHandle, MirrorOptions, MirrorRecord, MirrorSettings, MirrorSink, SinkConnector, SinkEvent,
    SinkEventStream,
};
use crate::error::AdapterError;

pub type EventSender = mpsc::UnboundedSender<Result<SinkEvent, AdapterError>>;

#[derive(Default)]
pub struct FakeSink {
    pub failing_probes: AtomicUsize,
    pub put_delay: Option<Duration>,
    pub fail_puts: bool,
    pub fail_reads: bool,
    pub puts: Mutex<Vec<(String, MirrorRecord)>>,
    /// One receiver per subscription, handed out in order. Once empty, new
    /// subscriptions never yield.
    pub streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<SinkEvent, AdapterError>>>>,
    pub subscriptions: AtomicUsize,
}

impl FakeSink {
    /// Queues a stream for the next subscription and returns its sender.
    pub fn push_stream(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().unwrap().push_back(rx);
        tx
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

#[async_trait]
impl MirrorSink for FakeSink {
    async fn probe(&self, _bus_id: &str) -> Result<(), AdapterError> {
        let remaining = self.failing_probes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_probes.store(remaining - 1, Ordering::SeqCst);
            return Err(AdapterError::Status(401));
        }
        Ok(())
    }

    async fn put_latest(&self, bus_id: &str, record: &MirrorRecord) -> Result<(), AdapterError> {
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_puts {
            return Err(AdapterError::Status(503));
        }
        self.puts.lock().unwrap().push((bus_id.to_string(), record.clone()));
        Ok(())
    }

    async fn get_latest(&self, bus_id: &str) -> Result<Option<MirrorRecord>, AdapterError> {
        if self.fail_reads {
            return Err(AdapterError::Status(500));
        }
        Ok(self
            .puts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(b, _)| b == bus_id)
            .map(|(_, r)| r.clone()))
    }

    async fn subscribe(&self, _bus_id: &str) -> Result<SinkEventStream, AdapterError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().unwrap().pop_front() {
            Some(rx) => Ok(rx.boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

pub fn settings() -> MirrorSettings {
    MirrorSettings {
        database_url: "https://demo.firebaseio.com/".to_string(),
        auth_token: None,
        bus_id: "bus_001".to_string(),
    }
}

pub fn options() -> MirrorOptions {
    MirrorOptions {
        request_timeout: Duration::from_millis(200),
        max_retries: 3,
        cooldown: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(10),
    }
}

/// Handle whose connector always yields `sink`, counting connections.
pub fn handle_with(sink: Arc<FakeSink>, connects: Arc<AtomicUsize>, defaults: Option<MirrorSettings>) -> MirrorHandle {
    let connector: SinkConnector = Arc::new(
        move |_settings: &MirrorSettings, _options: &MirrorOptions| -> Result<Arc<dyn MirrorSink>, AdapterError> {
            connects.fetch_add(1, Ordering::SeqCst);
            Ok(sink.clone())
        },
    );
    MirrorHandle::with_connector(defaults, options(), connector)
}

pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
