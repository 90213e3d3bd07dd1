//! 存储下沉：数据点入队不阻塞，后台任务按定时或批大小写入时序存储。
//!
//! - 当前批次满 `batch_size` 即封批进入待写队列，并唤醒写入任务
//! - 待写队列超过 `max_pending_batches` 时丢弃最旧批次（[`OverflowReason::QueueFull`]）
//! - 写入失败按指数退避重试，超过 `max_retries` 后丢弃该批次
//!   （[`OverflowReason::RetriesExhausted`]）
//!
//! 两种丢弃都会广播 [`SinkEvent::Overflow`] 并计数，不会阻塞生产者。

use domain::DataPoint;
use ems_storage::TimeSeriesStore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

/// 存储下沉错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(String),
    #[error("flusher stopped: {0}")]
    Flusher(String),
    #[error("sink closed")]
    Closed,
}

/// 存储下沉参数。
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub batch_size: usize,
    pub max_pending_batches: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_pending_batches: 64,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            retry_backoff_max: Duration::from_secs(5),
        }
    }
}

impl SinkConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.max_pending_batches == 0 {
            self.max_pending_batches = 1;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = Duration::from_millis(1);
        }
        self
    }

    /// 第 `attempt` 次失败后的等待时间（从 1 开始）。
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.retry_backoff_max)
    }
}

/// 批次被丢弃的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowReason {
    /// 待写队列已满，丢弃最旧批次
    QueueFull,
    /// 重试次数耗尽
    RetriesExhausted,
}

impl OverflowReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowReason::QueueFull => "queue_full",
            OverflowReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// 存储下沉事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    BatchWritten {
        points: usize,
    },
    Overflow {
        reason: OverflowReason,
        dropped_points: usize,
    },
}

struct SinkState {
    current: Vec<DataPoint>,
    pending: VecDeque<Vec<DataPoint>>,
    closed: bool,
}

struct SinkInner {
    store: Arc<dyn TimeSeriesStore>,
    config: SinkConfig,
    state: Mutex<SinkState>,
    wake: Notify,
    shutdown: Notify,
    events: broadcast::Sender<SinkEvent>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

/// 存储下沉句柄（可克隆，共享同一个后台写入任务）。
#[derive(Clone)]
pub struct StorageSink {
    inner: Arc<SinkInner>,
}

impl StorageSink {
    /// 创建并启动后台写入任务。
    pub fn spawn(store: Arc<dyn TimeSeriesStore>, config: SinkConfig) -> Self {
        let config = config.sanitized();
        let (events, _) = broadcast::channel(256);
        let inner = Arc::new(SinkInner {
            store,
            state: Mutex::new(SinkState {
                current: Vec::with_capacity(config.batch_size),
                pending: VecDeque::new(),
                closed: false,
            }),
            config,
            wake: Notify::new(),
            shutdown: Notify::new(),
            events,
            flusher: Mutex::new(None),
        });
        let handle = tokio::spawn(run_flusher(inner.clone()));
        *inner
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Self { inner }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.inner.config
    }

    /// 追加一个数据点，从不阻塞调用方；关闭后返回 [`PipelineError::Closed`]。
    pub fn enqueue(&self, point: DataPoint) -> Result<(), PipelineError> {
        let mut state = self.inner.lock_state();
        if state.closed {
            debug!(target: "ems.sink", "sink_closed_point_dropped");
            return Err(PipelineError::Closed);
        }
        state.current.push(point);
        if state.current.len() >= self.inner.config.batch_size {
            self.inner.seal(&mut state);
            drop(state);
            self.inner.wake.notify_one();
        }
        Ok(())
    }

    /// 订阅下沉事件（写入成功、丢弃）。
    pub fn subscribe_events(&self) -> broadcast::Receiver<SinkEvent> {
        self.inner.events.subscribe()
    }

    /// 待写批次数（不含当前未封批的数据点）。
    pub fn pending_batches(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    /// 尚未写入的数据点总数。
    pub fn buffered_points(&self) -> usize {
        let state = self.inner.lock_state();
        state.current.len() + state.pending.iter().map(Vec::len).sum::<usize>()
    }

    /// 立即封批并唤醒写入任务。
    pub fn flush_now(&self) {
        let mut state = self.inner.lock_state();
        self.inner.seal(&mut state);
        drop(state);
        self.inner.wake.notify_one();
    }

    /// 停止接收新数据，写完剩余批次后结束后台任务。
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        {
            let mut state = self.inner.lock_state();
            state.closed = true;
            self.inner.seal(&mut state);
        }
        self.inner.shutdown.notify_one();
        let handle = self
            .inner
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|err| PipelineError::Flusher(err.to_string()))?;
        }
        Ok(())
    }
}

impl SinkInner {
    fn lock_state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 把当前批次移入待写队列；超过上限时丢弃最旧批次。
    fn seal(&self, state: &mut SinkState) {
        if state.current.is_empty() {
            return;
        }
        let batch = std::mem::replace(
            &mut state.current,
            Vec::with_capacity(self.config.batch_size),
        );
        state.pending.push_back(batch);
        while state.pending.len() > self.config.max_pending_batches {
            if let Some(dropped) = state.pending.pop_front() {
                self.report_overflow(OverflowReason::QueueFull, dropped.len());
            }
        }
    }

    fn next_batch(&self) -> Option<Vec<DataPoint>> {
        self.lock_state().pending.pop_front()
    }

    fn report_overflow(&self, reason: OverflowReason, dropped_points: usize) {
        ems_telemetry::record_sink_overflow(dropped_points as u64);
        warn!(
            target: "ems.sink",
            reason = reason.as_str(),
            dropped_points,
            "sink_overflow"
        );
        let _ = self.events.send(SinkEvent::Overflow {
            reason,
            dropped_points,
        });
    }

    async fn write_with_retry(&self, batch: Vec<DataPoint>) {
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            match self.store.write_batch(&batch).await {
                Ok(written) => {
                    ems_telemetry::record_sink_batch_written(started.elapsed().as_millis() as u64);
                    debug!(target: "ems.sink", points = written, attempt, "sink_batch_written");
                    let _ = self.events.send(SinkEvent::BatchWritten { points: written });
                    return;
                }
                Err(err) => {
                    attempt += 1;
                    ems_telemetry::record_sink_write_failure();
                    let err = PipelineError::Store(err.to_string());
                    if attempt > self.config.max_retries {
                        error!(
                            target: "ems.sink",
                            points = batch.len(),
                            attempts = attempt,
                            error = %err,
                            "sink_batch_dropped"
                        );
                        self.report_overflow(OverflowReason::RetriesExhausted, batch.len());
                        return;
                    }
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        target: "ems.sink",
                        points = batch.len(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "sink_write_failed"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn drain(&self) {
        while let Some(batch) = self.next_batch() {
            self.write_with_retry(batch).await;
        }
    }
}

async fn run_flusher(inner: Arc<SinkInner>) {
    let mut ticker = interval(inner.config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    info!(
        target: "ems.sink",
        batch_size = inner.config.batch_size,
        max_pending_batches = inner.config.max_pending_batches,
        flush_interval_ms = inner.config.flush_interval.as_millis() as u64,
        "sink_started"
    );
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut state = inner.lock_state();
                inner.seal(&mut state);
            }
            _ = inner.wake.notified() => {}
            _ = inner.shutdown.notified() => {
                inner.drain().await;
                info!(target: "ems.sink", "sink_stopped");
                return;
            }
        }
        inner.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_until_cap() {
        let config = SinkConfig {
            retry_backoff: Duration::from_millis(200),
            retry_backoff_max: Duration::from_millis(700),
            ..SinkConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(2), Duration::from_millis(400));
        assert_eq!(config.retry_delay(3), Duration::from_millis(700));
    }

    #[test]
    fn sanitized_config_has_non_zero_limits() {
        let config = SinkConfig {
            batch_size: 0,
            max_pending_batches: 0,
            flush_interval: Duration::ZERO,
            ..SinkConfig::default()
        }
        .sanitized();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_pending_batches, 1);
        assert!(!config.flush_interval.is_zero());
    }
}
