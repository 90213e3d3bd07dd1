//! 追踪、请求 ID 与网关计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
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
}

/// 网关进程级计数器。
pub struct TelemetryMetrics {
    polls_issued: AtomicU64,
    polls_skipped_backoff: AtomicU64,
    polls_skipped_queue_full: AtomicU64,
    reads_ok: AtomicU64,
    reads_failed: AtomicU64,
    malformed_readings: AtomicU64,
    non_finite_values: AtomicU64,
    points_normalized: AtomicU64,
    sink_batches_written: AtomicU64,
    sink_overflow_events: AtomicU64,
    sink_points_dropped: AtomicU64,
    sink_write_failures: AtomicU64,
    sink_write_latency_ms_total: AtomicU64,
    sink_write_latency_ms_count: AtomicU64,
    publish_failures: AtomicU64,
    commands_applied: AtomicU64,
    commands_rejected: AtomicU64,
    commands_failed: AtomicU64,
    relay_messages_delivered: AtomicU64,
    relay_subscriber_drops: AtomicU64,
    relay_forced_disconnects: AtomicU64,
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            polls_issued: AtomicU64::new(0),
            polls_skipped_backoff: AtomicU64::new(0),
            polls_skipped_queue_full: AtomicU64::new(0),
            reads_ok: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            malformed_readings: AtomicU64::new(0),
            non_finite_values: AtomicU64::new(0),
            points_normalized: AtomicU64::new(0),
            sink_batches_written: AtomicU64::new(0),
            sink_overflow_events: AtomicU64::new(0),
            sink_points_dropped: AtomicU64::new(0),
            sink_write_failures: AtomicU64::new(0),
            sink_write_latency_ms_total: AtomicU64::new(0),
            sink_write_latency_ms_count: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            commands_applied: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            relay_messages_delivered: AtomicU64::new(0),
            relay_subscriber_drops: AtomicU64::new(0),
            relay_forced_disconnects: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_issued: self.polls_issued.load(Ordering::Relaxed),
            polls_skipped_backoff: self.polls_skipped_backoff.load(Ordering::Relaxed),
            polls_skipped_queue_full: self.polls_skipped_queue_full.load(Ordering::Relaxed),
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            malformed_readings: self.malformed_readings.load(Ordering::Relaxed),
            non_finite_values: self.non_finite_values.load(Ordering::Relaxed),
            points_normalized: self.points_normalized.load(Ordering::Relaxed),
            sink_batches_written: self.sink_batches_written.load(Ordering::Relaxed),
            sink_overflow_events: self.sink_overflow_events.load(Ordering::Relaxed),
            sink_points_dropped: self.sink_points_dropped.load(Ordering::Relaxed),
            sink_write_failures: self.sink_write_failures.load(Ordering::Relaxed),
            sink_write_latency_ms_total: self
                .sink_write_latency_ms_total
                .load(Ordering::Relaxed),
            sink_write_latency_ms_count: self
                .sink_write_latency_ms_count
                .load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            relay_messages_delivered: self.relay_messages_delivered.load(Ordering::Relaxed),
            relay_subscriber_drops: self.relay_subscriber_drops.load(Ordering::Relaxed),
            relay_forced_disconnects: self.relay_forced_disconnects.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 生成命令 correlation_id。
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录入队的轮询读次数。
pub fn record_poll_issued() {
    metrics().polls_issued.fetch_add(1, Ordering::Relaxed);
}

/// 记录因退避跳过的轮询 tick。
pub fn record_poll_skipped_backoff() {
    metrics()
        .polls_skipped_backoff
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录因会话队列已满跳过的轮询读。
pub fn record_poll_skipped_queue_full() {
    metrics()
        .polls_skipped_queue_full
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_read_ok() {
    metrics().reads_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_read_failed() {
    metrics().reads_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录长度不符的原始读数。
pub fn record_malformed_reading() {
    metrics().malformed_readings.fetch_add(1, Ordering::Relaxed);
}

/// 记录解码为 NaN/无穷而被跳过的值。
pub fn record_non_finite_value() {
    metrics().non_finite_values.fetch_add(1, Ordering::Relaxed);
}

/// 记录规范化输出的数据点数量。
pub fn record_points_normalized(count: u64) {
    metrics()
        .points_normalized
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录批次写入成功与耗时（毫秒）。
pub fn record_sink_batch_written(latency_ms: u64) {
    let metrics = metrics();
    metrics.sink_batches_written.fetch_add(1, Ordering::Relaxed);
    metrics
        .sink_write_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .sink_write_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录一次下沉溢出事件及其丢弃的点数。
pub fn record_sink_overflow(dropped_points: u64) {
    let metrics = metrics();
    metrics.sink_overflow_events.fetch_add(1, Ordering::Relaxed);
    metrics
        .sink_points_dropped
        .fetch_add(dropped_points, Ordering::Relaxed);
}

/// 记录单次写库失败（含重试）。
pub fn record_sink_write_failure() {
    metrics().sink_write_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_command_applied() {
    metrics().commands_applied.fetch_add(1, Ordering::Relaxed);
}

pub fn record_command_rejected() {
    metrics().commands_rejected.fetch_add(1, Ordering::Relaxed);
}

pub fn record_command_failed() {
    metrics().commands_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录推送给订阅者的消息数。
pub fn record_relay_delivered() {
    metrics()
        .relay_messages_delivered
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录订阅者队列溢出丢弃的消息数。
pub fn record_relay_drop() {
    metrics()
        .relay_subscriber_drops
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录慢订阅者被强制断开次数。
pub fn record_relay_forced_disconnect() {
    metrics()
        .relay_forced_disconnects
        .fetch_add(1, Ordering::Relaxed);
}
