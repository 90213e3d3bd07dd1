//! 轮询调度：每个设备一个独立定时器。
//!
//! 每次 tick 按分组声明顺序把读请求放入设备会话的轮询队列，再依次等待结果交给
//! [`ReadingHandler`]。设备处于退避期时整个 tick 跳过，不入队。

use async_trait::async_trait;
use domain::{DeviceDescriptor, RawReading, RegisterGroup};
use ems_protocol::{DeviceSession, ProtocolError, SessionRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
}

/// 原始读数处理器。
#[async_trait]
pub trait ReadingHandler: Send + Sync {
    async fn handle(
        &self,
        device: &DeviceDescriptor,
        group: &RegisterGroup,
        reading: RawReading,
    ) -> Result<(), IngestError>;
}

/// 采集源抽象。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn ReadingHandler>) -> Result<(), IngestError>;
}

/// 单次 tick 的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub skipped_backoff: bool,
    pub issued: usize,
    pub queue_full: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// 单设备轮询源。
pub struct DevicePoller {
    session: Arc<DeviceSession>,
}

impl DevicePoller {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        self.session.device()
    }

    /// 执行一次 tick。
    pub async fn poll_once(&self, handler: &dyn ReadingHandler) -> PollOutcome {
        let device = self.session.device();
        let mut outcome = PollOutcome::default();

        if let Some(remaining) = self.session.backoff_remaining() {
            ems_telemetry::record_poll_skipped_backoff();
            debug!(
                target: "ems.scheduler",
                device_name = %device.name,
                remaining_ms = remaining.as_millis() as u64,
                "poll_skipped_backoff"
            );
            outcome.skipped_backoff = true;
            return outcome;
        }

        let mut pending = Vec::with_capacity(device.groups.len());
        for group in &device.groups {
            match self.session.enqueue_read(group) {
                Ok(read) => {
                    ems_telemetry::record_poll_issued();
                    outcome.issued += 1;
                    pending.push((group, read));
                }
                Err(ProtocolError::QueueFull) => {
                    ems_telemetry::record_poll_skipped_queue_full();
                    outcome.queue_full += 1;
                    warn!(
                        target: "ems.scheduler",
                        device_name = %device.name,
                        register_name = %group.name,
                        "poll_skipped_queue_full"
                    );
                }
                Err(err) => {
                    outcome.failed += 1;
                    warn!(
                        target: "ems.scheduler",
                        device_name = %device.name,
                        register_name = %group.name,
                        error = %err,
                        "poll_enqueue_failed"
                    );
                }
            }
        }

        for (group, read) in pending {
            match read.wait().await {
                Ok(reading) => {
                    ems_telemetry::record_read_ok();
                    outcome.succeeded += 1;
                    if let Err(err) = handler.handle(device, group, reading).await {
                        warn!(
                            target: "ems.scheduler",
                            device_name = %device.name,
                            register_name = %group.name,
                            error = %err,
                            "reading_handler_failed"
                        );
                    }
                }
                Err(err) => {
                    ems_telemetry::record_read_failed();
                    outcome.failed += 1;
                    if matches!(err, ProtocolError::Backoff { .. }) {
                        debug!(
                            target: "ems.scheduler",
                            device_name = %device.name,
                            register_name = %group.name,
                            error = %err,
                            "poll_read_skipped"
                        );
                    } else {
                        warn!(
                            target: "ems.scheduler",
                            device_name = %device.name,
                            slave_id = device.slave_id,
                            register_name = %group.name,
                            error = %err,
                            "poll_read_failed"
                        );
                    }
                }
            }
        }
        outcome
    }
}

#[async_trait]
impl Source for DevicePoller {
    async fn run(&self, handler: Arc<dyn ReadingHandler>) -> Result<(), IngestError> {
        let device = self.session.device();
        if device.groups.is_empty() {
            info!(
                target: "ems.scheduler",
                device_name = %device.name,
                "no register groups configured, polling disabled"
            );
            return Ok(());
        }

        let mut ticker = interval(device.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once(handler.as_ref()).await;
        }
    }
}

/// 调度器：为注册表中的每个设备启动一个轮询任务。
pub struct PollingScheduler {
    pollers: Vec<Arc<DevicePoller>>,
}

impl PollingScheduler {
    pub fn from_registry(registry: &SessionRegistry) -> Self {
        Self {
            pollers: registry
                .iter()
                .map(|session| Arc::new(DevicePoller::new(Arc::clone(session))))
                .collect(),
        }
    }

    /// 启动所有设备的轮询任务。
    pub fn spawn(&self, handler: Arc<dyn ReadingHandler>) -> SchedulerHandle {
        let tasks = self
            .pollers
            .iter()
            .map(|poller| {
                let poller = Arc::clone(poller);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(err) = poller.run(handler).await {
                        warn!(
                            target: "ems.scheduler",
                            device_name = %poller.device().name,
                            error = %err,
                            "poller_stopped"
                        );
                    }
                })
            })
            .collect();
        SchedulerHandle { tasks }
    }
}

/// 轮询任务句柄。
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 停止所有轮询任务。
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
