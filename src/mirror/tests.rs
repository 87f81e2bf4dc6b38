use super::fake::{handle_with, settings, wait_until, FakeSink};
use super::*;
use crate::models::NewLocation;
use crate::store::MemoryLocationStore;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

fn report(id: i64, bus: &str) -> LocationReport {
    NewLocation::new(bus, 10.03, 76.32).into_report(id, Utc::now())
}

fn store() -> Arc<dyn LocationStore> {
    Arc::new(MemoryLocationStore::new())
}

#[tokio::test]
async fn test_unconfigured_mirror_rejects_reads_and_drops_forwards() {
    let sink = Arc::new(FakeSink::default());
    let mirror = handle_with(sink.clone(), Arc::new(AtomicUsize::new(0)), None);

    assert_eq!(mirror.state(), MirrorState::Unconfigured);
    assert!(matches!(mirror.read_latest("bus_001").await, Err(TrackerError::NotConfigured)));

    mirror.forward(&report(1, "bus_001"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sink.puts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_initialize_without_settings_is_not_configured() {
    let connects = Arc::new(AtomicUsize::new(0));
    let mirror = handle_with(Arc::new(FakeSink::default()), connects.clone(), None);

    let err = mirror.initialize(store(), None).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotConfigured));
    assert_eq!(mirror.state(), MirrorState::Unconfigured);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_init_can_be_retried() {
    let sink = Arc::new(FakeSink {
        failing_probes: AtomicUsize::new(1),
        ..FakeSink::default()
    });
    let mirror = handle_with(sink, Arc::new(AtomicUsize::new(0)), Some(settings()));

    let err = mirror.initialize(store(), None).await.unwrap_err();
    assert!(matches!(err, TrackerError::Adapter(AdapterError::Status(401))));
    assert_eq!(mirror.state(), MirrorState::FailedInit);
    assert!(matches!(mirror.read_latest("bus_001").await, Err(TrackerError::NotConfigured)));

    mirror.initialize(store(), None).await.unwrap();
    assert_eq!(mirror.state(), MirrorState::Ready);
    mirror.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_connects_once() {
    let connects = Arc::new(AtomicUsize::new(0));
    let mirror = handle_with(Arc::new(FakeSink::default()), connects.clone(), Some(settings()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let mirror = mirror.clone();
            tokio::spawn(async move { mirror.initialize(store(), None).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(mirror.state(), MirrorState::Ready);
    mirror.shutdown().await;
}

#[tokio::test]
async fn test_forward_and_read_latest_when_ready() {
    let sink = Arc::new(FakeSink::default());
    let mirror = handle_with(sink.clone(), Arc::new(AtomicUsize::new(0)), None);
    mirror.initialize(store(), Some(settings())).await.unwrap();

    mirror.forward(&report(7, "bus_002"));
    assert!(wait_until(|| !sink.puts.lock().unwrap().is_empty()).await);

    let record = mirror.read_latest("bus_002").await.unwrap().unwrap();
    assert_eq!((record.lat, record.lng), (10.03, 76.32));
    assert_eq!(record.id, Some(7));
    assert_eq!(record.source, Some(mirror.instance_id().to_string()));
    assert_eq!(mirror.read_latest("bus_404").await.unwrap(), None);
    mirror.shutdown().await;
}

#[tokio::test]
async fn test_slow_sink_does_not_block_forward() {
    let sink = Arc::new(FakeSink {
        put_delay: Some(Duration::from_secs(10)),
        ..FakeSink::default()
    });
    let mirror = handle_with(sink.clone(), Arc::new(AtomicUsize::new(0)), Some(settings()));
    mirror.initialize(store(), None).await.unwrap();

    let started = Instant::now();
    mirror.forward(&report(1, "bus_001"));
    assert!(started.elapsed() < Duration::from_millis(100));

    // The background put gives up at the request timeout without recording.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sink.puts.lock().unwrap().is_empty());
    mirror.shutdown().await;
}

#[tokio::test]
async fn test_read_errors_are_absorbed() {
    let sink = Arc::new(FakeSink {
        fail_reads: true,
        ..FakeSink::default()
    });
    let mirror = handle_with(sink, Arc::new(AtomicUsize::new(0)), Some(settings()));
    mirror.initialize(store(), None).await.unwrap();

    assert_eq!(mirror.read_latest("bus_001").await.unwrap(), None);
    mirror.shutdown().await;
}

#[tokio::test]
async fn test_listener_copies_external_fixes_into_store() {
    let sink = Arc::new(FakeSink::default());
    let tx = sink.push_stream();
    let mirror = handle_with(sink, Arc::new(AtomicUsize::new(0)), Some(settings()));
    let local = Arc::new(MemoryLocationStore::new());
    mirror.initialize(local.clone(), None).await.unwrap();

    let own = mirror.instance_id().to_string();
    let events = vec![
        // initial snapshot, skipped
        SinkEvent::Put { path: "/".to_string(), data: json!({"lat": 1.0, "lng": 1.0}) },
        SinkEvent::KeepAlive,
        // our own forward echoed back, skipped
        SinkEvent::Put { path: "/".to_string(), data: json!({"lat": 2.0, "lng": 2.0, "source": own}) },
        // partial child update, skipped
        SinkEvent::Patch { path: "/speed".to_string(), data: json!(30) },
        SinkEvent::Put { path: "/".to_string(), data: json!({"lat": "10.0450", "lng": 76.38, "speed": 48}) },
    ];
    for event in events {
        tx.unbounded_send(Ok(event)).unwrap();
    }

    let found = wait_until(|| {
        futures::executor::block_on(local.latest(None)).unwrap().is_some()
    })
    .await;
    assert!(found);

    mirror.shutdown().await;

    let history = local.history(10, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].latitude, 10.045);
    assert_eq!(history[0].bus_id, "bus_001");
    assert_eq!(history[0].speed, Some(48.0));
}

#[tokio::test]
async fn test_listener_catches_up_on_fix_written_while_disconnected() {
    let sink = Arc::new(FakeSink::default());
    let first = sink.push_stream();
    let second = sink.push_stream();
    let third = sink.push_stream();

    let put = |lat: f64| SinkEvent::Put { path: "/".to_string(), data: json!({"lat": lat, "lng": 76.3}) };

    // First connection: snapshot skipped, one live fix, then the stream drops.
    first.unbounded_send(Ok(put(1.0))).unwrap();
    first.unbounded_send(Ok(put(2.0))).unwrap();
    drop(first);
    // Reconnect: the producer moved on while we were away.
    second.unbounded_send(Ok(put(3.0))).unwrap();
    second
        .unbounded_send(Ok(SinkEvent::Cancelled("auth_revoked".to_string())))
        .unwrap();
    // Reconnect again: nothing new, so the snapshot is the fix already stored.
    third.unbounded_send(Ok(put(3.0))).unwrap();
    drop(third);

    let mirror = handle_with(sink.clone(), Arc::new(AtomicUsize::new(0)), Some(settings()));
    let local = Arc::new(MemoryLocationStore::new());
    mirror.initialize(local.clone(), None).await.unwrap();

    assert!(wait_until(|| sink.subscriptions.load(Ordering::SeqCst) >= 4).await);
    mirror.shutdown().await;

    let lats: Vec<f64> = local
        .history(10, None)
        .await
        .unwrap()
        .iter()
        .map(|r| r.latitude)
        .collect();
    assert_eq!(lats, vec![2.0, 3.0]);
}

#[test]
fn test_record_from_loose_value() {
    let record = MirrorRecord::from_value(
        json!({"lat": "10.03", "lng": 76.32, "timestamp": 1700000000000_i64, "last_updated": "2024-01-01T00:00:00"}),
        "bus_001",
    )
    .unwrap();
    assert_eq!(record.lat, 10.03);
    assert_eq!(record.timestamp, Some(1_700_000_000_000));
    assert_eq!(record.last_updated.as_deref(), Some("2024-01-01T00:00:00"));
    assert_eq!(record.bus_id.as_deref(), Some("bus_001"));

    assert!(MirrorRecord::from_value(json!({"foo": 1}), "bus_001").is_err());
}
