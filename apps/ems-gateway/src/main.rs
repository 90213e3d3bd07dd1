//! 采集与分发网关
//!
//! 启动顺序：配置 → 设备描述 → 时序存储与存储下沉 → 设备会话 → 事件发布与实时转发
//! → 写命令执行器（可选 MQTT 命令通道）→ 轮询调度 → HTTP/WebSocket。
//! 收到 ctrl-c 后停止 HTTP 与轮询，并把存储下沉中剩余的数据写完。

mod acquisition;
mod handlers;
mod routes;
mod utils;

use acquisition::AcquisitionHandler;
use ems_config::{AppConfig, RelaySource, load_devices};
use ems_control::{CommandExecutor, MqttCommandConfig, spawn_command_listener};
use ems_ingest::PollingScheduler;
use ems_pipeline::{SinkConfig, StorageSink};
use ems_protocol::{BackoffPolicy, ModbusTcpTransport, SessionConfig, SessionRegistry};
use ems_publish::{EventPublisher, InProcessBus, MqttBusPublisher, MqttPublisherConfig};
use ems_realtime::{MqttRelayConfig, Relay, RelayConfig, spawn_bus_feed, spawn_mqtt_feed};
use ems_storage::{InMemoryTimeSeriesStore, PgTimeSeriesStore, TimeSeriesStore};
use ems_telemetry::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub executor: CommandExecutor,
    pub relay: Relay,
    pub store: Arc<dyn TimeSeriesStore>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let devices = load_devices(&config.devices_file)?;
    info!(
        target: "ems.gateway",
        devices = devices.len(),
        file = %config.devices_file,
        "devices_loaded"
    );

    // 未配置数据库时使用内存存储
    let store: Arc<dyn TimeSeriesStore> = match &config.database_url {
        Some(url) => {
            let store = PgTimeSeriesStore::connect(url).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            warn!(target: "ems.gateway", "database_url_missing_using_memory_store");
            Arc::new(InMemoryTimeSeriesStore::new())
        }
    };
    let sink = StorageSink::spawn(store.clone(), sink_config(&config));

    let sessions = Arc::new(SessionRegistry::spawn_all(
        devices,
        Arc::new(ModbusTcpTransport::new()),
        &session_config(&config),
    )?);

    let bus = InProcessBus::new(1024);
    let mut publisher =
        EventPublisher::new(config.mqtt_data_topic_prefix.clone()).with_bus(Arc::new(bus.clone()));
    if config.publish_enabled {
        let (mqtt, _) = MqttBusPublisher::connect(MqttPublisherConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            client_id: config.mqtt_client_id.clone(),
            qos: config.mqtt_qos,
        });
        publisher = publisher.with_bus(Arc::new(mqtt));
    }

    let relay = Relay::new(RelayConfig {
        queue_capacity: config.relay_queue_capacity,
        disconnect_threshold: config.relay_disconnect_threshold,
    });
    match config.relay_source {
        RelaySource::Local => {
            spawn_bus_feed(relay.clone(), bus.subscribe());
        }
        RelaySource::Mqtt => {
            spawn_mqtt_feed(
                relay.clone(),
                MqttRelayConfig {
                    host: config.mqtt_host.clone(),
                    port: config.mqtt_port,
                    username: config.mqtt_username.clone(),
                    password: config.mqtt_password.clone(),
                    client_id: config.mqtt_client_id.clone(),
                    topic_prefix: config.mqtt_data_topic_prefix.clone(),
                },
            );
        }
    }

    let executor = CommandExecutor::new(sessions.clone());
    if config.command_listener_enabled {
        spawn_command_listener(
            executor.clone(),
            MqttCommandConfig {
                host: config.mqtt_host.clone(),
                port: config.mqtt_port,
                username: config.mqtt_username.clone(),
                password: config.mqtt_password.clone(),
                client_id: config.mqtt_client_id.clone(),
                command_topic: config.mqtt_command_topic.clone(),
                response_topic_prefix: config.mqtt_command_response_topic_prefix.clone(),
                qos: config.mqtt_qos,
            },
        );
    }

    let handler = Arc::new(AcquisitionHandler::new(sink.clone(), publisher));
    let scheduler = PollingScheduler::from_registry(&sessions).spawn(handler);
    info!(target: "ems.gateway", pollers = scheduler.len(), "scheduler_started");

    let state = AppState {
        sessions,
        executor,
        relay,
        store,
    };
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "ems.gateway", addr = %config.http_addr, "http_listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    sink.shutdown().await?;
    info!(target: "ems.gateway", "gateway_stopped");
    Ok(())
}

fn session_config(config: &AppConfig) -> SessionConfig {
    SessionConfig {
        op_timeout: Duration::from_millis(config.device_op_timeout_ms),
        connect_timeout: Duration::from_millis(config.device_connect_timeout_ms),
        backoff: BackoffPolicy {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_exponent: config.backoff_max_exponent,
            jitter_percent: config.backoff_jitter_percent,
        },
        poll_queue_capacity: config.session_poll_queue,
        ..SessionConfig::default()
    }
}

fn sink_config(config: &AppConfig) -> SinkConfig {
    SinkConfig {
        batch_size: config.sink_batch_size,
        max_pending_batches: config.sink_max_pending_batches,
        flush_interval: Duration::from_millis(config.sink_flush_interval_ms),
        max_retries: config.sink_max_retries,
        retry_backoff: Duration::from_millis(config.sink_retry_backoff_ms),
        retry_backoff_max: Duration::from_millis(config.sink_retry_backoff_max_ms),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: "ems.gateway", error = %err, "shutdown_signal_failed");
        std::future::pending::<()>().await;
    }
    info!(target: "ems.gateway", "shutdown_requested");
}
