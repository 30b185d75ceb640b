//! 事件总线配置
//!
//! `EventBusConfig` 可通过 builder 在代码中构造，也可用 `from_env` 从
//! `EVENT_BUS__*` 环境变量加载（`__` 分隔嵌套字段，时长以毫秒表示）：
//!
//! - `EVENT_BUS__NAMING_PREFIX=jmapEvent`
//! - `EVENT_BUS__EXECUTION_RATE=16`
//! - `EVENT_BUS__RETRY_BACKOFF__MAX_RETRIES=3`
//! - `EVENT_BUS__RETRY_BACKOFF__FIRST_BACKOFF_MS=250`
//! - `EVENT_BUS__RETRY_BACKOFF__JITTER_FACTOR=0.2`
//!
mod error;
mod retry_backoff;

pub use error::ConfigError;
pub use retry_backoff::RetryBackoffConfig;

use crate::registration::NamingStrategy;
use bon::Builder;
use serde::Deserialize;

pub const ENV_PREFIX: &str = "EVENT_BUS";

#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
pub struct EventBusConfig {
    /// 交换机与队列名前缀
    #[serde(default = "default_naming_prefix")]
    #[builder(into, default = default_naming_prefix())]
    pub naming_prefix: String,

    /// 分发扇出与组消费的并发上限（同时作为 prefetch）
    #[serde(default = "default_execution_rate")]
    #[builder(default = default_execution_rate())]
    pub execution_rate: usize,

    #[serde(default)]
    #[builder(default)]
    pub retry_backoff: RetryBackoffConfig,
}

impl EventBusConfig {
    /// 从 `EVENT_BUS__*` 环境变量加载并校验
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn from_environment(environment: config::Environment) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.naming_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("naming_prefix", "must not be blank"));
        }
        if self.execution_rate == 0 {
            return Err(ConfigError::invalid(
                "execution_rate",
                "must be greater than zero",
            ));
        }
        self.retry_backoff.validate()
    }

    pub fn naming_strategy(&self) -> NamingStrategy {
        NamingStrategy::new(self.naming_prefix.clone())
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            naming_prefix: default_naming_prefix(),
            execution_rate: default_execution_rate(),
            retry_backoff: RetryBackoffConfig::default(),
        }
    }
}

fn default_naming_prefix() -> String {
    NamingStrategy::MAILBOX_EVENT_PREFIX.to_string()
}

fn default_execution_rate() -> usize {
    10
}
