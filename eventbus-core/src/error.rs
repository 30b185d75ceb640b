//! 事件总线统一错误定义
//!
//! 聚焦编解码、路由键、broker 交互、死信存储、注册生命周期等最小必要集合，
//! 便于各组件统一转换为 `EventBusError`。监听器自身的失败以 `anyhow::Error`
//! 表达，不在此枚举内。
//!
use crate::config::ConfigError;
use crate::registration::Group;
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventBusError {
    // --- 编解码 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("decode error: {reason}")]
    Decode { reason: String },
    #[error("invalid routing key: {routing_key}, reason={reason}")]
    InvalidRoutingKey { routing_key: String, reason: String },

    // --- 基础设施 ---
    #[error("broker error: {reason}")]
    Broker { reason: String },
    #[error("dead letters error: {reason}")]
    DeadLetters { reason: String },

    #[error("configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    // --- 注册与生命周期 ---
    #[error("group already registered: {group}")]
    GroupAlreadyRegistered { group: Group },
    #[error("group registration not found: {group}")]
    GroupRegistrationNotFound { group: Group },
    #[error("group can not be registered: {group}, reason={reason}")]
    InvalidGroup { group: Group, reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("event bus is not running")]
    NotRunning,
}

impl EventBusError {
    pub fn broker(reason: impl Into<String>) -> Self {
        Self::Broker {
            reason: reason.into(),
        }
    }

    pub fn dead_letters(reason: impl Into<String>) -> Self {
        Self::DeadLetters {
            reason: reason.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type EventBusResult<T> = Result<T, EventBusError>;

impl From<std::str::Utf8Error> for EventBusError {
    fn from(err: std::str::Utf8Error) -> Self {
        EventBusError::Decode {
            reason: err.to_string(),
        }
    }
}

impl From<uuid::Error> for EventBusError {
    fn from(err: uuid::Error) -> Self {
        EventBusError::Decode {
            reason: err.to_string(),
        }
    }
}
