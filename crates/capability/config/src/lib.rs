//! 应用运行配置加载。
//!
//! - 运行参数来自 `EMS_*` 环境变量（均有默认值，设备描述文件路径除外）
//! - 设备描述来自 JSON 文件，加载时完成校验

mod devices;

pub use devices::{load_devices, parse_devices};

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("device file error: {0}")]
    DeviceFile(String),
    #[error("invalid device descriptor: {0}")]
    InvalidDevice(String),
}

/// 实时转发的数据来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySource {
    /// 进程内总线
    Local,
    /// 订阅 MQTT broker
    Mqtt,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub devices_file: String,
    pub database_url: Option<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_data_topic_prefix: String,
    pub mqtt_command_topic: String,
    pub mqtt_command_response_topic_prefix: String,
    pub mqtt_qos: u8,
    pub publish_enabled: bool,
    pub command_listener_enabled: bool,
    pub relay_source: RelaySource,
    pub device_op_timeout_ms: u64,
    pub device_connect_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_max_exponent: u32,
    pub backoff_jitter_percent: u8,
    pub session_poll_queue: usize,
    pub sink_batch_size: usize,
    pub sink_max_pending_batches: usize,
    pub sink_flush_interval_ms: u64,
    pub sink_max_retries: u32,
    pub sink_retry_backoff_ms: u64,
    pub sink_retry_backoff_max_ms: u64,
    pub relay_queue_capacity: usize,
    pub relay_disconnect_threshold: u32,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let devices_file = env::var("EMS_DEVICES_FILE")
            .map_err(|_| ConfigError::Missing("EMS_DEVICES_FILE".to_string()))?;
        let http_addr = env::var("EMS_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let database_url = read_optional("EMS_DATABASE_URL");
        let mqtt_host = env::var("EMS_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("EMS_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("EMS_MQTT_USERNAME");
        let mqtt_password = read_optional("EMS_MQTT_PASSWORD");
        let mqtt_client_id =
            env::var("EMS_MQTT_CLIENT_ID").unwrap_or_else(|_| "ems-gateway".to_string());
        let mqtt_data_topic_prefix = env::var("EMS_MQTT_DATA_TOPIC_PREFIX")
            .unwrap_or_else(|_| "modbus/gateway".to_string())
            .trim_end_matches('/')
            .to_string();
        let mqtt_command_topic = env::var("EMS_MQTT_COMMAND_TOPIC")
            .unwrap_or_else(|_| "modbus/gateway/control/command".to_string());
        let mqtt_command_response_topic_prefix =
            env::var("EMS_MQTT_COMMAND_RESPONSE_TOPIC_PREFIX")
                .unwrap_or_else(|_| "modbus/gateway/control/response".to_string())
                .trim_end_matches('/')
                .to_string();
        let mqtt_qos = read_u8_with_default("EMS_MQTT_QOS", 1)?;
        if mqtt_qos > 2 {
            return Err(ConfigError::Invalid(
                "EMS_MQTT_QOS".to_string(),
                mqtt_qos.to_string(),
            ));
        }
        let publish_enabled = read_bool_with_default("EMS_PUBLISH", false);
        let command_listener_enabled = read_bool_with_default("EMS_COMMAND_LISTENER", false);
        let relay_source = match read_optional("EMS_RELAY_SOURCE") {
            None => RelaySource::Local,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "local" => RelaySource::Local,
                "mqtt" => RelaySource::Mqtt,
                _ => return Err(ConfigError::Invalid("EMS_RELAY_SOURCE".to_string(), value)),
            },
        };
        let device_op_timeout_ms = read_positive_u64("EMS_DEVICE_OP_TIMEOUT_MS", 3_000)?;
        let device_connect_timeout_ms =
            read_positive_u64("EMS_DEVICE_CONNECT_TIMEOUT_MS", 3_000)?;
        let backoff_base_ms = read_positive_u64("EMS_BACKOFF_BASE_MS", 500)?;
        let backoff_max_ms = read_positive_u64("EMS_BACKOFF_MAX_MS", 30_000)?;
        let backoff_max_exponent = read_u32_with_default("EMS_BACKOFF_MAX_EXPONENT", 6)?;
        let backoff_jitter_percent = read_u8_with_default("EMS_BACKOFF_JITTER_PERCENT", 20)?;
        if backoff_jitter_percent > 100 {
            return Err(ConfigError::Invalid(
                "EMS_BACKOFF_JITTER_PERCENT".to_string(),
                backoff_jitter_percent.to_string(),
            ));
        }
        let session_poll_queue = read_positive_u64("EMS_SESSION_POLL_QUEUE", 32)? as usize;
        let sink_batch_size = read_positive_u64("EMS_SINK_BATCH_SIZE", 100)? as usize;
        let sink_max_pending_batches =
            read_positive_u64("EMS_SINK_MAX_PENDING_BATCHES", 64)? as usize;
        let sink_flush_interval_ms = read_positive_u64("EMS_SINK_FLUSH_INTERVAL_MS", 1_000)?;
        let sink_max_retries = read_u32_with_default("EMS_SINK_MAX_RETRIES", 3)?;
        let sink_retry_backoff_ms = read_u64_with_default("EMS_SINK_RETRY_BACKOFF_MS", 200)?;
        let sink_retry_backoff_max_ms =
            read_u64_with_default("EMS_SINK_RETRY_BACKOFF_MAX_MS", 5_000)?;
        let relay_queue_capacity = read_positive_u64("EMS_RELAY_QUEUE_CAPACITY", 256)? as usize;
        let relay_disconnect_threshold =
            read_u32_with_default("EMS_RELAY_DISCONNECT_THRESHOLD", 64)?;

        Ok(Self {
            http_addr,
            devices_file,
            database_url,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_data_topic_prefix,
            mqtt_command_topic,
            mqtt_command_response_topic_prefix,
            mqtt_qos,
            publish_enabled,
            command_listener_enabled,
            relay_source,
            device_op_timeout_ms,
            device_connect_timeout_ms,
            backoff_base_ms,
            backoff_max_ms,
            backoff_max_exponent,
            backoff_jitter_percent,
            session_poll_queue,
            sink_batch_size,
            sink_max_pending_batches,
            sink_flush_interval_ms,
            sink_max_retries,
            sink_retry_backoff_ms,
            sink_retry_backoff_max_ms,
            relay_queue_capacity,
            relay_disconnect_threshold,
        })
    }

    /// 是否需要 MQTT 连接。
    pub fn mqtt_required(&self) -> bool {
        self.publish_enabled
            || self.command_listener_enabled
            || self.relay_source == RelaySource::Mqtt
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取必须大于 0 的 u64。
fn read_positive_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = read_u64_with_default(key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid(key.to_string(), "0".to_string()));
    }
    Ok(value)
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
