//! 退避策略：`min(base · 2^min(failures−1, max_exponent), max)`，再叠加 `[0, delay · jitter%)` 的均匀抖动。

use rand_core::{OsRng, RngCore};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_exponent: u32,
    /// 0..=100
    pub jitter_percent: u8,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_exponent: 6,
            jitter_percent: 20,
        }
    }
}

impl BackoffPolicy {
    /// 不含抖动的延迟；`failures` 从 1 开始计。
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(self.max_exponent).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.max)
    }

    /// 第 `failures` 次连续失败后的退避时长。
    pub fn delay(&self, failures: u32) -> Duration {
        let delay = self.base_delay(failures);
        let jitter_percent = u64::from(self.jitter_percent.min(100));
        if jitter_percent == 0 {
            return delay;
        }
        let span_ms = (delay.as_millis() as u64).saturating_mul(jitter_percent) / 100;
        if span_ms == 0 {
            return delay;
        }
        let jitter_ms = u64::from(OsRng.next_u32()) % span_ms;
        delay + Duration::from_millis(jitter_ms)
    }
}
