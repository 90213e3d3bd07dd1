//! 稳定的 DTO 与 API 响应契约。
//!
//! 实时推送消息的形状：
//! `{topic, payload: {timestamp, value, tags: {device_name, slave_id, register_name, address, register_type}}}`。
//! 标签值统一序列化为字符串。

use domain::{
    CommandOutcome, CommandValue, DataPoint, DataValue, RegisterKind, TagSet, WriteCommand,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// DTO 与领域类型互转失败。
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ContractError {
    #[error("invalid field {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

impl ContractError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 数据点取值（JSON 原生类型）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl From<DataValue> for LiveValue {
    fn from(value: DataValue) -> Self {
        match value {
            DataValue::Bool(v) => LiveValue::Bool(v),
            DataValue::Int(v) => LiveValue::Int(v),
            DataValue::Float(v) => LiveValue::Float(v),
        }
    }
}

impl From<LiveValue> for DataValue {
    fn from(value: LiveValue) -> Self {
        match value {
            LiveValue::Bool(v) => DataValue::Bool(v),
            LiveValue::Int(v) => DataValue::Int(v),
            LiveValue::Float(v) => DataValue::Float(v),
        }
    }
}

impl LiveValue {
    /// 解析纯文本载荷：`true`/`false`/整数/浮点。
    pub fn parse_plain(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "true" => return Some(LiveValue::Bool(true)),
            "false" => return Some(LiveValue::Bool(false)),
            _ => {}
        }
        if let Ok(value) = raw.parse::<i64>() {
            return Some(LiveValue::Int(value));
        }
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(LiveValue::Float)
    }
}

/// 标签集（字符串形式）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsDto {
    pub device_name: String,
    pub slave_id: String,
    #[serde(default)]
    pub register_name: String,
    pub address: String,
    pub register_type: String,
}

impl From<&TagSet> for TagsDto {
    fn from(tags: &TagSet) -> Self {
        Self {
            device_name: tags.device_name.clone(),
            slave_id: tags.slave_id.to_string(),
            register_name: tags.register_name.clone(),
            address: tags.address.to_string(),
            register_type: tags.register_type.as_str().to_string(),
        }
    }
}

impl TagsDto {
    /// 还原为领域标签集。
    pub fn to_tag_set(&self) -> Result<TagSet, ContractError> {
        let slave_id = self
            .slave_id
            .trim()
            .parse::<u8>()
            .map_err(|err| ContractError::invalid("slave_id", err.to_string()))?;
        let address = self
            .address
            .trim()
            .parse::<u16>()
            .map_err(|err| ContractError::invalid("address", err.to_string()))?;
        let register_type = self
            .register_type
            .parse::<RegisterKind>()
            .map_err(|err| ContractError::invalid("register_type", err))?;
        Ok(TagSet {
            device_name: self.device_name.clone(),
            slave_id,
            register_name: self.register_name.clone(),
            address,
            register_type,
        })
    }
}

/// 实时推送载荷，同时用作 MQTT 发布载荷与历史查询结果项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePayload {
    /// 毫秒时间戳
    pub timestamp: i64,
    pub value: LiveValue,
    pub tags: TagsDto,
}

impl From<&DataPoint> for LivePayload {
    fn from(point: &DataPoint) -> Self {
        Self {
            timestamp: point.ts_ms,
            value: point.value.into(),
            tags: TagsDto::from(&point.tags),
        }
    }
}

impl LivePayload {
    /// 还原为数据点；单调时钟取当前时刻。
    pub fn to_data_point(&self) -> Result<DataPoint, ContractError> {
        Ok(DataPoint {
            ts_ms: self.timestamp,
            acquired_at: Instant::now(),
            value: self.value.into(),
            tags: self.tags.to_tag_set()?,
        })
    }
}

/// WebSocket 推送消息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdateMessage {
    pub topic: String,
    pub payload: LivePayload,
}

/// 实时订阅参数。
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeQuery {
    pub topic: Option<String>,
}

/// 写寄存器请求（HTTP 与 MQTT 命令通道共用）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRegisterRequest {
    pub slave_id: u8,
    pub register_type: String,
    pub address: u16,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl WriteRegisterRequest {
    /// 转换为写命令；只做形状检查，业务校验由执行器完成。
    pub fn to_command(&self) -> Result<WriteCommand, ContractError> {
        let register_type = self
            .register_type
            .parse::<RegisterKind>()
            .map_err(|err| ContractError::invalid("register_type", err))?;
        let value = match &self.value {
            serde_json::Value::Bool(v) => CommandValue::Bool(*v),
            serde_json::Value::Number(number) => {
                if let Some(v) = number.as_i64() {
                    CommandValue::Int(v)
                } else if let Some(v) = number.as_u64() {
                    CommandValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
                } else {
                    CommandValue::Float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            other => {
                return Err(ContractError::invalid(
                    "value",
                    format!("expected boolean or number, got {}", other),
                ));
            }
        };
        Ok(WriteCommand {
            slave_id: self.slave_id,
            register_type,
            address: self.address,
            value,
            correlation_id: self.correlation_id.clone(),
        })
    }
}

/// 写寄存器响应。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    /// applied / rejected / failed
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_details: Option<serde_json::Value>,
}

impl WriteResponse {
    pub fn from_outcome(
        outcome: &CommandOutcome,
        request_details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            status: outcome.status.as_str().to_string(),
            message: outcome.message.clone(),
            correlation_id: outcome.correlation_id.clone(),
            request_details,
        }
    }
}

/// 历史查询参数（毫秒时间戳，闭区间）。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub device_name: Option<String>,
    pub slave_id: Option<u8>,
    pub register_type: Option<String>,
    pub address: Option<u16>,
    pub limit: Option<u32>,
}

/// 寄存器分组返回结构。
#[derive(Debug, Serialize)]
pub struct RegisterGroupDto {
    pub name: String,
    pub register_type: String,
    pub address: u16,
    pub count: u16,
    pub encoding: String,
}

/// 设备及会话状态返回结构。
#[derive(Debug, Serialize)]
pub struct DeviceStatusDto {
    pub name: String,
    pub slave_id: u8,
    pub host: String,
    pub port: u16,
    pub polling_interval_ms: u64,
    pub status: String,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success_ms: Option<i64>,
    pub backoff_remaining_ms: Option<u64>,
    pub register_groups: Vec<RegisterGroupDto>,
}

/// 指标快照返回结构。
#[derive(Debug, Serialize)]
pub struct MetricsSnapshotDto {
    pub polls_issued: u64,
    pub polls_skipped_backoff: u64,
    pub polls_skipped_queue_full: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub malformed_readings: u64,
    pub non_finite_values: u64,
    pub points_normalized: u64,
    pub sink_batches_written: u64,
    pub sink_overflow_events: u64,
    pub sink_points_dropped: u64,
    pub sink_write_failures: u64,
    pub sink_write_latency_ms_total: u64,
    pub sink_write_latency_ms_count: u64,
    pub publish_failures: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    pub commands_failed: u64,
    pub relay_messages_delivered: u64,
    pub relay_subscriber_drops: u64,
    pub relay_forced_disconnects: u64,
    pub relay_subscribers: u64,
}
