use crate::device::RegisterKind;
use std::fmt;

/// 写命令取值：线圈为布尔，保持寄存器为整数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandValue {
    Bool(bool),
    Int(i64),
    /// 非整数数值，校验阶段会被拒绝
    Float(f64),
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandValue::Bool(v) => write!(f, "{}", v),
            CommandValue::Int(v) => write!(f, "{}", v),
            CommandValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// 外部写命令，只消费一次。
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommand {
    pub slave_id: u8,
    pub register_type: RegisterKind,
    pub address: u16,
    pub value: CommandValue,
    pub correlation_id: Option<String>,
}

/// 命令终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Applied,
    Rejected,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Applied => "applied",
            CommandStatus::Rejected => "rejected",
            CommandStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 命令执行结果（附可读原因）。
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    pub message: String,
    pub correlation_id: Option<String>,
}

impl CommandOutcome {
    pub fn applied(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Applied,
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Rejected,
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
