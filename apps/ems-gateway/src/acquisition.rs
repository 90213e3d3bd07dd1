//! 采集链路装配
//!
//! 轮询调度器交来的原始读数在这里完成规范化，
//! 同一个数据点分别送入存储下沉与事件发布，两条路径互不等待。

use async_trait::async_trait;
use domain::{DeviceDescriptor, RawReading, RegisterGroup};
use ems_ingest::{IngestError, ReadingHandler};
use ems_normalize::normalize_or_drop;
use ems_pipeline::StorageSink;
use ems_publish::EventPublisher;
use tracing::debug;

pub struct AcquisitionHandler {
    sink: StorageSink,
    publisher: EventPublisher,
}

impl AcquisitionHandler {
    pub fn new(sink: StorageSink, publisher: EventPublisher) -> Self {
        Self { sink, publisher }
    }
}

#[async_trait]
impl ReadingHandler for AcquisitionHandler {
    async fn handle(
        &self,
        device: &DeviceDescriptor,
        group: &RegisterGroup,
        reading: RawReading,
    ) -> Result<(), IngestError> {
        let points = normalize_or_drop(device, group, &reading);
        debug!(
            target: "ems.scheduler",
            device_name = %device.name,
            register_name = %group.name,
            points = points.len(),
            "reading_normalized"
        );
        for point in points {
            self.publisher.publish(&point);
            self.sink
                .enqueue(point)
                .map_err(|err| IngestError::Handler(err.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_contract::LiveValue;
    use domain::{RawValues, RegisterEncoding, RegisterKind, TransportAddress};
    use ems_ingest::PollingScheduler;
    use ems_pipeline::{OverflowReason, SinkConfig, SinkEvent};
    use ems_protocol::{
        BackoffPolicy, ScriptStep, ScriptedTransport, SessionConfig, SessionRegistry,
    };
    use ems_publish::InProcessBus;
    use ems_realtime::{Relay, spawn_bus_feed};
    use ems_storage::InMemoryTimeSeriesStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    fn sim_device(polling_interval: Duration) -> DeviceDescriptor {
        DeviceDescriptor {
            name: "SimDevice1".to_string(),
            slave_id: 1,
            transport: TransportAddress {
                host: "127.0.0.1".to_string(),
                port: 5020,
            },
            groups: vec![
                RegisterGroup::new("power", RegisterKind::HoldingRegister, 0, 2)
                    .with_encoding(RegisterEncoding::Uint32),
            ],
            polling_interval,
        }
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            backoff: BackoffPolicy {
                jitter_percent: 0,
                ..BackoffPolicy::default()
            },
            ..SessionConfig::default()
        }
    }

    struct Harness {
        store: Arc<InMemoryTimeSeriesStore>,
        sink: StorageSink,
        relay: Relay,
        _registry: Arc<SessionRegistry>,
    }

    fn harness(
        device: DeviceDescriptor,
        transport: &ScriptedTransport,
        sink_config: SinkConfig,
    ) -> Harness {
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let sink = StorageSink::spawn(store.clone(), sink_config);
        let bus = InProcessBus::new(64);
        let relay = Relay::default();
        spawn_bus_feed(relay.clone(), bus.subscribe());
        let publisher = EventPublisher::new("modbus/gateway").with_bus(Arc::new(bus));
        let registry = Arc::new(
            SessionRegistry::spawn_all([device], Arc::new(transport.clone()), &session_config())
                .unwrap(),
        );
        let handler = Arc::new(AcquisitionHandler::new(sink.clone(), publisher));
        let scheduler = PollingScheduler::from_registry(&registry);
        let _handle = scheduler.spawn(handler);
        Harness {
            store,
            sink,
            relay,
            _registry: registry,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_ticks_produce_three_single_point_batches() {
        let transport = ScriptedTransport::new();
        transport.set_register(RegisterKind::HoldingRegister, 0, 0);
        transport.set_register(RegisterKind::HoldingRegister, 1, 1234);
        let h = harness(sim_device(Duration::from_secs(5)), &transport, SinkConfig::default());
        let live = h.relay.subscribe(Some("modbus/gateway/SimDevice1")).unwrap();

        sleep(Duration::from_millis(11_500)).await;

        assert_eq!(h.store.batch_sizes(), vec![1, 1, 1]);
        for record in h.store.records() {
            assert_eq!(record.tags.device_name, "SimDevice1");
            assert_eq!(record.tags.register_type, RegisterKind::HoldingRegister);
            assert_eq!(record.tags.address, 0);
        }

        let mut delivered = 0;
        while let Some(message) = live.try_recv() {
            assert_eq!(message.topic, "modbus/gateway/SimDevice1/1/holding_register/0");
            assert_eq!(message.payload.tags.address, "0");
            assert_eq!(message.payload.value, LiveValue::Int(1234));
            delivered += 1;
        }
        assert_eq!(delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn store_outage_drops_batches_while_relay_keeps_delivering() {
        let transport = ScriptedTransport::new();
        transport.set_register(RegisterKind::HoldingRegister, 1, 7);
        let h = harness(
            sim_device(Duration::from_secs(1)),
            &transport,
            SinkConfig {
                batch_size: 1,
                max_retries: 2,
                retry_backoff: Duration::from_millis(200),
                ..SinkConfig::default()
            },
        );
        h.store.set_available(false);
        let mut events = h.sink.subscribe_events();
        let live = h.relay.subscribe(None).unwrap();

        sleep(Duration::from_millis(4_500)).await;

        assert!(h.store.is_empty());
        let mut retries_exhausted = 0;
        while let Ok(event) = events.try_recv() {
            if let SinkEvent::Overflow {
                reason: OverflowReason::RetriesExhausted,
                dropped_points,
            } = event
            {
                assert_eq!(dropped_points, 1);
                retries_exhausted += 1;
            }
        }
        assert!(retries_exhausted >= 3);

        let mut delivered = 0;
        while live.try_recv().is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn short_read_is_dropped_and_polling_continues() {
        let transport = ScriptedTransport::new();
        transport.set_register(RegisterKind::HoldingRegister, 1, 42);
        transport.push_steps([ScriptStep::ShortRead]);
        let h = harness(
            sim_device(Duration::from_secs(1)),
            &transport,
            SinkConfig {
                batch_size: 1,
                ..SinkConfig::default()
            },
        );
        let live = h.relay.subscribe(None).unwrap();
        let before = ems_telemetry::metrics().snapshot().malformed_readings;

        sleep(Duration::from_millis(500)).await;

        assert!(h.store.is_empty());
        assert!(live.try_recv().is_none());
        let malformed = ems_telemetry::metrics().snapshot().malformed_readings;
        assert_eq!(malformed - before, 1);

        // 下一次 tick 正常采集
        sleep(Duration::from_millis(1_000)).await;

        assert_eq!(h.store.len(), 1);
        let message = live.try_recv().unwrap();
        assert_eq!(message.payload.value, LiveValue::Int(42));
        assert!(live.try_recv().is_none());
        let malformed = ems_telemetry::metrics().snapshot().malformed_readings;
        assert_eq!(malformed - before, 1);
    }

    #[tokio::test]
    async fn closed_sink_surfaces_handler_error() {
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let sink = StorageSink::spawn(store.clone(), SinkConfig::default());
        let handler = AcquisitionHandler::new(sink.clone(), EventPublisher::new("modbus/gateway"));
        sink.shutdown().await.unwrap();

        let device = sim_device(Duration::from_secs(5));
        let reading = RawReading::new(RawValues::Registers(vec![0, 5]));
        let result = handler.handle(&device, &device.groups[0], reading).await;

        assert!(matches!(result, Err(IngestError::Handler(_))));
        assert!(store.is_empty());
    }
}
