use domain::{DataPoint, DataValue, RegisterKind, TagSet};
use ems_pipeline::{OverflowReason, PipelineError, SinkConfig, SinkEvent, StorageSink};
use ems_storage::InMemoryTimeSeriesStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::Receiver;
use tokio::time::sleep;

fn point(address: u16) -> DataPoint {
    DataPoint {
        ts_ms: 1_700_000_000_000 + i64::from(address),
        acquired_at: Instant::now(),
        value: DataValue::Int(i64::from(address)),
        tags: TagSet {
            device_name: "SimDevice1".to_string(),
            slave_id: 1,
            register_name: "power".to_string(),
            address,
            register_type: RegisterKind::HoldingRegister,
        },
    }
}

fn drain_events(rx: &mut Receiver<SinkEvent>) -> Vec<SinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn flushes_on_size_and_on_timer() {
    let store = Arc::new(InMemoryTimeSeriesStore::new());
    let sink = StorageSink::spawn(
        store.clone(),
        SinkConfig {
            batch_size: 3,
            ..SinkConfig::default()
        },
    );

    for address in 0..7 {
        sink.enqueue(point(address)).unwrap();
    }
    sleep(Duration::from_millis(10)).await;
    assert_eq!(store.batch_sizes(), vec![3, 3]);
    assert_eq!(sink.buffered_points(), 1);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(store.batch_sizes(), vec![3, 3, 1]);
    assert_eq!(sink.buffered_points(), 0);
}

#[tokio::test(start_paused = true)]
async fn full_queue_drops_oldest_batch() {
    let store = Arc::new(InMemoryTimeSeriesStore::new());
    let sink = StorageSink::spawn(
        store.clone(),
        SinkConfig {
            batch_size: 1,
            max_pending_batches: 2,
            ..SinkConfig::default()
        },
    );
    let mut events = sink.subscribe_events();

    for address in 0..5 {
        sink.enqueue(point(address)).unwrap();
    }
    assert_eq!(sink.pending_batches(), 2);

    sleep(Duration::from_millis(10)).await;
    let addresses: Vec<u16> = store.records().iter().map(|r| r.tags.address).collect();
    assert_eq!(addresses, vec![3, 4]);

    let overflow = drain_events(&mut events)
        .into_iter()
        .filter(|event| {
            *event
                == SinkEvent::Overflow {
                    reason: OverflowReason::QueueFull,
                    dropped_points: 1,
                }
        })
        .count();
    assert_eq!(overflow, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_drop_batch_and_emit_overflow() {
    let store = Arc::new(InMemoryTimeSeriesStore::new());
    store.set_available(false);
    let sink = StorageSink::spawn(
        store.clone(),
        SinkConfig {
            batch_size: 2,
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
            ..SinkConfig::default()
        },
    );
    let mut events = sink.subscribe_events();

    sink.enqueue(point(0)).unwrap();
    sink.enqueue(point(1)).unwrap();

    // 200 ms + 400 ms 重试等待
    sleep(Duration::from_millis(700)).await;
    assert_eq!(store.rejected_writes(), 3);
    assert!(store.is_empty());
    assert_eq!(
        drain_events(&mut events),
        vec![SinkEvent::Overflow {
            reason: OverflowReason::RetriesExhausted,
            dropped_points: 2,
        }]
    );

    store.set_available(true);
    sink.enqueue(point(2)).unwrap();
    sink.enqueue(point(3)).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(store.batch_sizes(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn store_recovering_within_retry_limit_keeps_batch() {
    let store = Arc::new(InMemoryTimeSeriesStore::new());
    store.set_available(false);
    let sink = StorageSink::spawn(
        store.clone(),
        SinkConfig {
            batch_size: 1,
            ..SinkConfig::default()
        },
    );
    let mut events = sink.subscribe_events();

    sink.enqueue(point(0)).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.rejected_writes(), 1);

    store.set_available(true);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(store.len(), 1);
    assert_eq!(
        drain_events(&mut events),
        vec![SinkEvent::BatchWritten { points: 1 }]
    );
}

#[tokio::test]
async fn shutdown_flushes_partial_batch_and_closes() {
    let store = Arc::new(InMemoryTimeSeriesStore::new());
    let sink = StorageSink::spawn(store.clone(), SinkConfig::default());

    sink.enqueue(point(0)).unwrap();
    sink.enqueue(point(1)).unwrap();
    sink.shutdown().await.unwrap();
    assert_eq!(store.batch_sizes(), vec![2]);

    assert!(matches!(sink.enqueue(point(2)), Err(PipelineError::Closed)));
    assert_eq!(sink.buffered_points(), 0);
}
