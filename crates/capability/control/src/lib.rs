//! 写命令执行：校验后派发到目标设备会话。
//!
//! - 校验失败返回 `rejected`，不接触设备
//! - 会话写入失败（传输、超时、设备异常、退避中）返回 `failed`
//! - 命令在会话内排在待执行轮询之前，但不抢占在途操作
//! - 不做去重：相同命令重复提交会被重新校验并再次写入

mod mqtt;

pub use mqtt::{MqttCommandConfig, parse_command_payload, response_topic, spawn_command_listener};

use domain::{
    CommandOutcome, CommandValue, DeviceDescriptor, RegisterKind, WriteCommand,
};
use ems_protocol::{ProtocolError, RegisterWrite, SessionRegistry};
use ems_telemetry::{record_command_applied, record_command_failed, record_command_rejected};
use std::sync::Arc;
use tracing::{info, warn};

/// 写命令校验错误。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown slave_id {0}")]
    UnknownDevice(u8),
    #[error("register type {0} is not writable")]
    NotWritable(RegisterKind),
    #[error("{kind} expects {expected}, got {value}")]
    ValueType {
        kind: RegisterKind,
        expected: &'static str,
        value: CommandValue,
    },
    #[error("value {0} out of range 0..=65535")]
    ValueRange(i64),
    #[error("address {address} is outside the declared {kind} space of {device}")]
    AddressOutOfRange {
        device: String,
        kind: RegisterKind,
        address: u16,
    },
}

/// 控制链路错误。
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] ProtocolError),
    #[error("payload error: {0}")]
    Payload(String),
}

/// 校验写命令并转换为会话写入值。
///
/// 设备未声明该类型的任何分组时，地址不做限制。
pub fn validate(
    device: &DeviceDescriptor,
    command: &WriteCommand,
) -> Result<RegisterWrite, ValidationError> {
    let kind = command.register_type;
    if !kind.is_writable() {
        return Err(ValidationError::NotWritable(kind));
    }
    let value = match (kind, command.value) {
        (RegisterKind::Coil, CommandValue::Bool(v)) => RegisterWrite::Coil(v),
        (RegisterKind::Coil, other) => {
            return Err(ValidationError::ValueType {
                kind,
                expected: "a boolean",
                value: other,
            });
        }
        (_, CommandValue::Int(v)) => {
            let word = u16::try_from(v).map_err(|_| ValidationError::ValueRange(v))?;
            RegisterWrite::Register(word)
        }
        (_, CommandValue::Float(v)) if v.is_finite() && v.fract() == 0.0 => {
            let int = v as i64;
            let word = u16::try_from(int).map_err(|_| ValidationError::ValueRange(int))?;
            RegisterWrite::Register(word)
        }
        (_, other) => {
            return Err(ValidationError::ValueType {
                kind,
                expected: "an integer",
                value: other,
            });
        }
    };
    if device.declares_kind(kind) && device.group_covering(kind, command.address).is_none() {
        return Err(ValidationError::AddressOutOfRange {
            device: device.name.clone(),
            kind,
            address: command.address,
        });
    }
    Ok(value)
}

/// 写命令执行器（可克隆）。
#[derive(Clone)]
pub struct CommandExecutor {
    sessions: Arc<SessionRegistry>,
}

impl CommandExecutor {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// 校验并执行写命令，返回终态。
    pub async fn submit(&self, command: WriteCommand) -> CommandOutcome {
        let correlation_id = command.correlation_id.clone();
        let outcome = match self.execute(&command).await {
            Ok(message) => {
                record_command_applied();
                info!(
                    target: "ems.control",
                    slave_id = command.slave_id,
                    register_type = %command.register_type,
                    address = command.address,
                    value = %command.value,
                    correlation_id = ?correlation_id,
                    "command_applied"
                );
                CommandOutcome::applied(message)
            }
            Err(ControlError::Validation(err)) => {
                record_command_rejected();
                warn!(
                    target: "ems.control",
                    slave_id = command.slave_id,
                    register_type = %command.register_type,
                    address = command.address,
                    correlation_id = ?correlation_id,
                    error = %err,
                    "command_rejected"
                );
                CommandOutcome::rejected(err.to_string())
            }
            Err(err) => {
                record_command_failed();
                warn!(
                    target: "ems.control",
                    slave_id = command.slave_id,
                    register_type = %command.register_type,
                    address = command.address,
                    correlation_id = ?correlation_id,
                    error = %err,
                    "command_failed"
                );
                CommandOutcome::failed(failure_message(&err))
            }
        };
        outcome.with_correlation_id(correlation_id)
    }

    async fn execute(&self, command: &WriteCommand) -> Result<String, ControlError> {
        let session = self
            .sessions
            .by_slave_id(command.slave_id)
            .ok_or(ValidationError::UnknownDevice(command.slave_id))?;
        let device = session.device();
        let value = validate(device, command)?;
        session.write(command.address, value).await?;
        Ok(format!(
            "wrote {} to {} {} on {}",
            command.value, command.register_type, command.address, device.name
        ))
    }
}

fn failure_message(err: &ControlError) -> String {
    match err {
        ControlError::Dispatch(err) => err.to_string(),
        other => other.to_string(),
    }
}
