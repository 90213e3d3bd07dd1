//! 可编排的内存传输实现
//!
//! 用于接线与测试：按脚本注入延迟、传输错误、异常码或短读，
//! 记录每次读写的开始/结束事件与最大并发数。

use crate::error::ProtocolError;
use crate::transport::{DeviceConnection, DeviceTransport, RegisterWrite};
use async_trait::async_trait;
use domain::{DeviceDescriptor, RawValues, RegisterKind};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 单次操作的脚本步骤。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptStep {
    Ok,
    /// 延迟后成功
    Delay(Duration),
    TransportError,
    ProtocolError,
    /// 设备异常码（读为 Protocol，写为 Rejected）
    Exception,
    /// 返回比请求少一个的值
    ShortRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    Start,
    End,
}

/// 传输边界上观察到的事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportEvent {
    pub phase: TransportPhase,
    pub op: TransportOp,
    pub kind: RegisterKind,
    pub address: u16,
}

#[derive(Default)]
struct ScriptedInner {
    bank: Mutex<HashMap<(RegisterKind, u16), u16>>,
    steps: Mutex<VecDeque<ScriptStep>>,
    default_delay: Mutex<Duration>,
    events: Mutex<Vec<TransportEvent>>,
    connect_failures: AtomicU32,
    connects: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// 内存传输（克隆共享同一份状态）。
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<ScriptedInner>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置寄存器（或位，0/1）的当前值。
    pub fn set_register(&self, kind: RegisterKind, address: u16, value: u16) {
        if let Ok(mut bank) = self.inner.bank.lock() {
            bank.insert((kind, address), value);
        }
    }

    pub fn register(&self, kind: RegisterKind, address: u16) -> Option<u16> {
        self.inner
            .bank
            .lock()
            .ok()
            .and_then(|bank| bank.get(&(kind, address)).copied())
    }

    /// 追加脚本步骤，按操作顺序逐个消费；脚本耗尽后操作按默认延迟成功。
    pub fn push_steps(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        if let Ok(mut queue) = self.inner.steps.lock() {
            queue.extend(steps);
        }
    }

    pub fn set_default_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.inner.default_delay.lock() {
            *current = delay;
        }
    }

    /// 接下来 `count` 次连接尝试以拒绝连接失败。
    pub fn fail_connects(&self, count: u32) {
        self.inner.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.inner
            .events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// 已完成的操作（按结束顺序）。
    pub fn completed(&self) -> Vec<TransportEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.phase == TransportPhase::End)
            .collect()
    }

    /// 观察到的最大并发操作数。
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> ScriptStep {
        self.inner
            .steps
            .lock()
            .ok()
            .and_then(|mut steps| steps.pop_front())
            .unwrap_or(ScriptStep::Ok)
    }

    fn default_delay(&self) -> Duration {
        self.inner
            .default_delay
            .lock()
            .map(|delay| *delay)
            .unwrap_or_default()
    }

    fn record(&self, event: TransportEvent) {
        if let Ok(mut events) = self.inner.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn connect(
        &self,
        _device: &DeviceDescriptor,
    ) -> Result<Box<dyn DeviceConnection>, ProtocolError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .inner
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ProtocolError::Transport("connection refused".to_string()));
        }
        Ok(Box::new(ScriptedConnection {
            transport: self.clone(),
        }))
    }
}

struct ScriptedConnection {
    transport: ScriptedTransport,
}

/// 在途计数守卫；操作被取消时同样会递减。
struct InFlight<'a> {
    inner: &'a ScriptedInner,
}

impl<'a> InFlight<'a> {
    fn enter(inner: &'a ScriptedInner) -> Self {
        let current = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(current, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedConnection {
    async fn run_step(&self, step: ScriptStep) -> Result<(), ProtocolError> {
        match step {
            ScriptStep::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ScriptStep::TransportError => {
                Err(ProtocolError::Transport("connection reset".to_string()))
            }
            ScriptStep::ProtocolError => {
                Err(ProtocolError::Protocol("malformed response".to_string()))
            }
            ScriptStep::Ok | ScriptStep::Exception | ScriptStep::ShortRead => {
                let delay = self.transport.default_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DeviceConnection for ScriptedConnection {
    async fn read(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<RawValues, ProtocolError> {
        let event = |phase| TransportEvent {
            phase,
            op: TransportOp::Read,
            kind,
            address,
        };
        let _guard = InFlight::enter(&self.transport.inner);
        self.transport.record(event(TransportPhase::Start));
        let step = self.transport.next_step();
        self.run_step(step).await?;
        if step == ScriptStep::Exception {
            return Err(ProtocolError::Protocol("exception: IllegalDataAddress".to_string()));
        }

        let returned = if step == ScriptStep::ShortRead {
            count.saturating_sub(1)
        } else {
            count
        };
        let words: Vec<u16> = {
            let bank = self
                .transport
                .inner
                .bank
                .lock()
                .map_err(|_| ProtocolError::Protocol("lock failed".to_string()))?;
            (0..returned)
                .map(|offset| {
                    let addr = address.wrapping_add(offset);
                    bank.get(&(kind, addr)).copied().unwrap_or(0)
                })
                .collect()
        };
        self.transport.record(event(TransportPhase::End));

        Ok(if kind.is_bit() {
            RawValues::Bits(words.into_iter().map(|word| word != 0).collect())
        } else {
            RawValues::Registers(words)
        })
    }

    async fn write(&mut self, address: u16, value: RegisterWrite) -> Result<(), ProtocolError> {
        let kind = value.kind();
        let event = |phase| TransportEvent {
            phase,
            op: TransportOp::Write,
            kind,
            address,
        };
        let _guard = InFlight::enter(&self.transport.inner);
        self.transport.record(event(TransportPhase::Start));
        let step = self.transport.next_step();
        self.run_step(step).await?;
        if step == ScriptStep::Exception {
            return Err(ProtocolError::Rejected("exception: IllegalDataValue".to_string()));
        }

        let word = match value {
            RegisterWrite::Coil(bit) => u16::from(bit),
            RegisterWrite::Register(word) => word,
        };
        self.transport.set_register(kind, address, word);
        self.transport.record(event(TransportPhase::End));
        Ok(())
    }
}
