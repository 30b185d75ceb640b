use crate::event::{MailboxId, Username};
use std::fmt;

/// 注册键：监听器按 key 订阅事件子集，按值相等
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistrationKey {
    Mailbox(MailboxId),
    User(Username),
}

impl RegistrationKey {
    pub(crate) const MAILBOX: &'static str = "mailbox";
    pub(crate) const USER: &'static str = "user";

    /// key 的类型标签，用作路由键前缀
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mailbox(_) => Self::MAILBOX,
            Self::User(_) => Self::USER,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Mailbox(id) => id.as_str(),
            Self::User(username) => username.as_str(),
        }
    }
}

impl From<MailboxId> for RegistrationKey {
    fn from(value: MailboxId) -> Self {
        Self::Mailbox(value)
    }
}

impl From<Username> for RegistrationKey {
    fn from(value: Username) -> Self {
        Self::User(value)
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}
