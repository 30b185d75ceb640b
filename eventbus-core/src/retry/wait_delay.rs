use crate::config::RetryBackoffConfig;
use rand::Rng;
use std::time::Duration;

/// 重投递等待时长生成器
///
/// 第 n 次重试（n ≥ 1）等待 `2^n * first_backoff`，再加上
/// `[0, 2^n * first_backoff * jitter_factor]` 内的随机抖动；首次投递不等待。
#[derive(Debug, Clone)]
pub struct WaitDelayGenerator {
    retry_backoff: RetryBackoffConfig,
}

impl WaitDelayGenerator {
    pub fn new(retry_backoff: RetryBackoffConfig) -> Self {
        Self { retry_backoff }
    }

    pub fn generate_delay(&self, retry_count: u32) -> Duration {
        if retry_count == 0 || self.retry_backoff.max_retries == 0 {
            return Duration::ZERO;
        }
        let base = exponential(self.retry_backoff.first_backoff(), retry_count);
        base.saturating_add(jitter(base, self.retry_backoff.jitter_factor))
    }

    pub async fn delay_if_have_to(&self, retry_count: u32) {
        let delay = self.generate_delay(retry_count);
        if !delay.is_zero() {
            tracing::trace!(retry_count, delay_ms = delay.as_millis() as u64, "delaying redelivery");
            tokio::time::sleep(delay).await;
        }
    }
}

/// `first * 2^exponent`，溢出时饱和
pub(crate) fn exponential(first: Duration, exponent: u32) -> Duration {
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    first.saturating_mul(factor)
}

/// `[0, base * factor]` 内的均匀随机抖动
pub(crate) fn jitter(base: Duration, factor: f64) -> Duration {
    if base.is_zero() || factor <= 0.0 {
        return Duration::ZERO;
    }
    let max = base.as_secs_f64() * factor;
    let picked = rand::rng().random_range(0.0..=max);
    Duration::try_from_secs_f64(picked).unwrap_or(Duration::MAX)
}
