//! 设备会话：每个设备一个 worker，独占该设备的连接。
//!
//! - 命令队列优先于轮询队列（两级队列，不抢占在途操作）
//! - 同一时刻最多一个在途读/写
//! - 超时或传输错误：丢弃连接、进入退避；下一次操作时惰性重连
//! - 退避期间出队的操作立即以 `Backoff` 失败

use crate::backoff::BackoffPolicy;
use crate::error::ProtocolError;
use crate::transport::{DeviceConnection, DeviceTransport, RegisterWrite};
use domain::{DeviceDescriptor, RawReading, RegisterGroup, RegisterKind, now_epoch_ms};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// 会话配置。
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub op_timeout: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub poll_queue_capacity: usize,
    pub command_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(3),
            backoff: BackoffPolicy::default(),
            poll_queue_capacity: 32,
            command_queue_capacity: 16,
        }
    }
}

/// 连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Backoff => "backoff",
        }
    }
}

/// 会话状态快照，只由会话 worker 写入。
#[derive(Debug, Clone)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_success_ms: Option<i64>,
    pub backoff_until: Option<Instant>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_error: None,
            consecutive_failures: 0,
            last_success_ms: None,
            backoff_until: None,
        }
    }

    /// 剩余退避时长；已到期返回 None。
    pub fn backoff_remaining(&self) -> Option<Duration> {
        let until = self.backoff_until?;
        let remaining = until.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    /// 退避到期但尚未有新操作时视为 disconnected。
    pub fn effective_status(&self) -> ConnectionStatus {
        if self.status == ConnectionStatus::Backoff && self.backoff_remaining().is_none() {
            ConnectionStatus::Disconnected
        } else {
            self.status
        }
    }
}

enum Operation {
    Read {
        kind: RegisterKind,
        address: u16,
        count: u16,
    },
    Write {
        address: u16,
        value: RegisterWrite,
    },
}

enum OpOutput {
    Reading(RawReading),
    Written,
}

type Reply = oneshot::Sender<Result<OpOutput, ProtocolError>>;

struct Request {
    op: Operation,
    reply: Reply,
}

/// 已入队读请求的回执。
pub struct PendingRead {
    reply: oneshot::Receiver<Result<OpOutput, ProtocolError>>,
}

impl PendingRead {
    /// 等待读结果。
    pub async fn wait(self) -> Result<RawReading, ProtocolError> {
        match self.reply.await {
            Ok(Ok(OpOutput::Reading(reading))) => Ok(reading),
            Ok(Ok(OpOutput::Written)) => {
                Err(ProtocolError::Protocol("unexpected write ack".to_string()))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProtocolError::ChannelClosed),
        }
    }
}

/// 设备会话句柄。
pub struct DeviceSession {
    device: Arc<DeviceDescriptor>,
    commands: mpsc::Sender<Request>,
    polls: mpsc::Sender<Request>,
    state: watch::Receiver<SessionState>,
}

impl DeviceSession {
    /// 创建会话并启动 worker（需要在 tokio 运行时内调用）。
    pub fn spawn(
        device: Arc<DeviceDescriptor>,
        transport: Arc<dyn DeviceTransport>,
        config: SessionConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let (poll_tx, poll_rx) = mpsc::channel(config.poll_queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::new());

        let worker = SessionWorker {
            device: Arc::clone(&device),
            transport,
            config,
            link: None,
            state: state_tx,
            commands: command_rx,
            polls: poll_rx,
        };
        tokio::spawn(worker.run());

        Self {
            device,
            commands: command_tx,
            polls: poll_tx,
            state: state_rx,
        }
    }

    pub fn device(&self) -> &Arc<DeviceDescriptor> {
        &self.device
    }

    /// 当前状态快照。
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.state.borrow().backoff_remaining()
    }

    /// 将分组读请求放入轮询队列，不等待结果。
    pub fn enqueue_read(&self, group: &RegisterGroup) -> Result<PendingRead, ProtocolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            op: Operation::Read {
                kind: group.kind,
                address: group.address,
                count: group.count,
            },
            reply: reply_tx,
        };
        self.polls.try_send(request).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ProtocolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ChannelClosed,
        })?;
        Ok(PendingRead { reply: reply_rx })
    }

    /// 读取一个分组并等待结果。
    pub async fn read(&self, group: &RegisterGroup) -> Result<RawReading, ProtocolError> {
        self.enqueue_read(group)?.wait().await
    }

    /// 写入单个线圈或保持寄存器；排在所有待执行轮询之前。
    pub async fn write(&self, address: u16, value: RegisterWrite) -> Result<(), ProtocolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            op: Operation::Write { address, value },
            reply: reply_tx,
        };
        self.commands
            .send(request)
            .await
            .map_err(|_| ProtocolError::ChannelClosed)?;
        match reply_rx.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProtocolError::ChannelClosed),
        }
    }
}

struct SessionWorker {
    device: Arc<DeviceDescriptor>,
    transport: Arc<dyn DeviceTransport>,
    config: SessionConfig,
    link: Option<Box<dyn DeviceConnection>>,
    state: watch::Sender<SessionState>,
    commands: mpsc::Receiver<Request>,
    polls: mpsc::Receiver<Request>,
}

impl SessionWorker {
    async fn run(mut self) {
        loop {
            let request = tokio::select! {
                biased;
                Some(request) = self.commands.recv() => request,
                Some(request) = self.polls.recv() => request,
                else => break,
            };
            let result = self.execute(request.op).await;
            let _ = request.reply.send(result);
        }
        debug!(
            target: "ems.session",
            device_name = %self.device.name,
            "session_worker_stopped"
        );
    }

    async fn execute(&mut self, op: Operation) -> Result<OpOutput, ProtocolError> {
        if let Some(remaining) = self.check_backoff() {
            let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX).max(1);
            return Err(ProtocolError::Backoff { remaining_ms });
        }

        let mut link = match self.link.take() {
            Some(link) => link,
            None => self.connect().await?,
        };

        let op_timeout = self.config.op_timeout;
        // 超时后 future 被丢弃，在途调用随之取消，连接不再复用。
        let result = match timeout(op_timeout, perform(link.as_mut(), &op)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(op_timeout)),
        };

        match result {
            Ok(output) => {
                self.link = Some(link);
                self.on_success();
                Ok(output)
            }
            Err(err) if err.is_connection_fault() => {
                drop(link);
                self.on_connection_fault(&err);
                Err(err)
            }
            Err(err) => {
                self.link = Some(link);
                self.on_device_error(&err);
                Err(err)
            }
        }
    }

    async fn connect(&mut self) -> Result<Box<dyn DeviceConnection>, ProtocolError> {
        self.state
            .send_modify(|state| state.status = ConnectionStatus::Connecting);

        let connect_timeout = self.config.connect_timeout;
        let result = match timeout(connect_timeout, self.transport.connect(&self.device)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(connect_timeout)),
        };

        match result {
            Ok(link) => {
                self.state
                    .send_modify(|state| state.status = ConnectionStatus::Connected);
                info!(
                    target: "ems.session",
                    device_name = %self.device.name,
                    slave_id = self.device.slave_id,
                    transport = %self.device.transport,
                    "session_connected"
                );
                Ok(link)
            }
            Err(err) => {
                self.on_connection_fault(&err);
                Err(err)
            }
        }
    }

    /// 退避未到期返回剩余时长；到期则清除退避标记。
    fn check_backoff(&mut self) -> Option<Duration> {
        let until = self.state.borrow().backoff_until?;
        let now = Instant::now();
        if until > now {
            return Some(until - now);
        }
        self.state.send_modify(|state| {
            state.backoff_until = None;
            state.status = ConnectionStatus::Disconnected;
        });
        None
    }

    fn on_success(&mut self) {
        let previous_failures = self.state.borrow().consecutive_failures;
        self.state.send_modify(|state| {
            state.status = ConnectionStatus::Connected;
            state.consecutive_failures = 0;
            state.backoff_until = None;
            state.last_success_ms = Some(now_epoch_ms());
        });
        if previous_failures > 0 {
            info!(
                target: "ems.session",
                device_name = %self.device.name,
                previous_failures,
                "session_recovered"
            );
        }
    }

    fn on_connection_fault(&mut self, err: &ProtocolError) {
        let failures = self.state.borrow().consecutive_failures.saturating_add(1);
        let delay = self.config.backoff.delay(failures);
        let until = Instant::now() + delay;
        let message = err.to_string();
        self.state.send_modify(|state| {
            state.status = ConnectionStatus::Backoff;
            state.consecutive_failures = failures;
            state.backoff_until = Some(until);
            state.last_error = Some(message);
        });
        warn!(
            target: "ems.session",
            device_name = %self.device.name,
            slave_id = self.device.slave_id,
            failures,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "session_backoff"
        );
    }

    fn on_device_error(&mut self, err: &ProtocolError) {
        let message = err.to_string();
        self.state.send_modify(|state| {
            state.status = ConnectionStatus::Connected;
            state.last_error = Some(message);
        });
        warn!(
            target: "ems.session",
            device_name = %self.device.name,
            slave_id = self.device.slave_id,
            error = %err,
            "device_error"
        );
    }
}

async fn perform(
    link: &mut dyn DeviceConnection,
    op: &Operation,
) -> Result<OpOutput, ProtocolError> {
    match *op {
        Operation::Read {
            kind,
            address,
            count,
        } => {
            let values = link.read(kind, address, count).await?;
            Ok(OpOutput::Reading(RawReading::new(values)))
        }
        Operation::Write { address, value } => {
            link.write(address, value).await?;
            Ok(OpOutput::Written)
        }
    }
}
