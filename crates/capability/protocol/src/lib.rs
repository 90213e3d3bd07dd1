//! # 设备会话能力模块
//!
//! 每个设备拥有一个 [`DeviceSession`]：独立的 worker 持有该设备唯一的连接，
//! 串行执行所有读写。
//!
//! ## 架构设计
//!
//! ```text
//! Polling Scheduler ──enqueue_read──┐
//!                                   ▼
//!                        ┌─ poll queue (bounded, try_send)
//! DeviceSession worker ──┤
//!                        └─ command queue (优先)
//!                                   ▲
//! Command Executor ───────write─────┘
//!       │
//!       ▼
//! DeviceTransport::connect → DeviceConnection (ModbusTcp / Scripted)
//! ```
//!
//! ## 错误与退避
//!
//! - `Timeout` / `Transport`：丢弃连接，`consecutive_failures + 1`，进入退避
//! - `Protocol` / `Rejected`：记录 last_error，连接保留，不退避
//! - 成功：清零失败计数，状态回到 `connected`

mod backoff;
mod error;
mod modbus_tcp;
mod registry;
mod scripted;
mod session;
mod transport;

pub use backoff::BackoffPolicy;
pub use error::ProtocolError;
pub use modbus_tcp::{ModbusTcpConnection, ModbusTcpTransport};
pub use registry::SessionRegistry;
pub use scripted::{ScriptStep, ScriptedTransport, TransportEvent, TransportOp, TransportPhase};
pub use session::{ConnectionStatus, DeviceSession, PendingRead, SessionConfig, SessionState};
pub use transport::{DeviceConnection, DeviceTransport, RegisterWrite};
