//! 协议错误类型定义

use std::time::Duration;

/// 设备会话与传输错误
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ProtocolError {
    /// 操作超时（连接被放弃并进入退避）
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// 连接级错误（拒绝连接、断开、IO）
    #[error("transport error: {0}")]
    Transport(String),

    /// 响应异常或格式错误（不触发退避）
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 设备拒绝写入（异常码）
    #[error("rejected by device: {0}")]
    Rejected(String),

    /// 会话处于退避期
    #[error("device in backoff, retry in {remaining_ms} ms")]
    Backoff { remaining_ms: u64 },

    /// 轮询队列已满
    #[error("session queue full")]
    QueueFull,

    /// 会话已关闭
    #[error("channel closed")]
    ChannelClosed,

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),
}

impl ProtocolError {
    /// 是否需要丢弃连接并进入退避。
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, ProtocolError::Timeout(_) | ProtocolError::Transport(_))
    }
}
