//! 路由键（RoutingKey）与转换器
//!
//! 线上格式：`<kind>:<value>`，例如 `mailbox:42`、`user:bob`；
//! 空路由键保留给组广播。value 中可以包含分隔符，解析时只按第一个分隔符切分；
//! value 可以为空（如 `user:`），与可构造的 `RegistrationKey` 一一对应。
//!
use super::RegistrationKey;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::{MailboxId, Username};
use std::fmt;

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// 组广播使用的空路由键
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn of(key: &RegistrationKey) -> Self {
        Self(format!("{}{}{}", key.kind(), SEPARATOR, key.value()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `RegistrationKey` 与路由键字符串之间的双向转换
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingKeyConverter;

impl RoutingKeyConverter {
    pub fn to_routing_key(key: &RegistrationKey) -> RoutingKey {
        RoutingKey::of(key)
    }

    pub fn to_registration_key(routing_key: &str) -> Result<RegistrationKey> {
        let invalid = |reason: &str| EventBusError::InvalidRoutingKey {
            routing_key: routing_key.to_string(),
            reason: reason.to_string(),
        };

        let (kind, value) = routing_key
            .split_once(SEPARATOR)
            .ok_or_else(|| invalid("missing separator"))?;

        match kind {
            RegistrationKey::MAILBOX => Ok(RegistrationKey::Mailbox(MailboxId::new(value))),
            RegistrationKey::USER => Ok(RegistrationKey::User(Username::new(value))),
            _ => Err(invalid("unknown registration key type")),
        }
    }
}
