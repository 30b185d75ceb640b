//! 重试与退避（retry）
//!
//! - `WaitDelayGenerator`：按重试次数计算投递前的等待时长（指数退避 + 抖动）；
//! - `GroupConsumerRetry`：组监听失败后经重试交换机重新入队，或在重试耗尽后写入死信；
//! - `retry_with_backoff`：基础设施操作（如组注册启动）的退避重试。
//!
mod backoff;
mod group_consumer_retry;
mod wait_delay;

pub use group_consumer_retry::{GroupConsumerRetry, RETRY_COUNT_HEADER, retry_count_of};
pub use wait_delay::WaitDelayGenerator;

pub(crate) use backoff::retry_with_backoff;
