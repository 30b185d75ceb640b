use super::ConfigError;
use bon::Builder;
use serde::Deserialize;
use std::time::Duration;

/// 重试退避参数
///
/// 同时用于组注册启动重试与投递失败后的重投延迟。
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
pub struct RetryBackoffConfig {
    /// 最大重试次数，0 表示不重试
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// 首次退避（毫秒）
    #[serde(default = "default_first_backoff_ms")]
    #[builder(default = default_first_backoff_ms())]
    pub first_backoff_ms: u64,

    /// 抖动系数，取值 [0, 1]
    #[serde(default = "default_jitter_factor")]
    #[builder(default = default_jitter_factor())]
    pub jitter_factor: f64,
}

impl RetryBackoffConfig {
    pub fn first_backoff(&self) -> Duration {
        Duration::from_millis(self.first_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "retry_backoff.jitter_factor",
                format!("{} is outside [0, 1]", self.jitter_factor),
            ));
        }
        Ok(())
    }
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            first_backoff_ms: default_first_backoff_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_max_retries() -> u32 {
    8
}

fn default_first_backoff_ms() -> u64 {
    100
}

fn default_jitter_factor() -> f64 {
    0.5
}
