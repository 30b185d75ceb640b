use super::wait_delay::{exponential, jitter};
use crate::config::RetryBackoffConfig;
use crate::error::EventBusResult as Result;
use std::future::Future;

/// 以指数退避 + 抖动重试异步操作，最多额外尝试 `max_retries` 次，耗尽后返回最后一次错误
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    retry_backoff: &RetryBackoffConfig,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retry_backoff.max_retries => {
                let base = exponential(retry_backoff.first_backoff(), attempt);
                let delay = base.saturating_add(jitter(base, retry_backoff.jitter_factor));
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
