//! 死信存储（dead letters）
//!
//! 重试耗尽或组广播发布失败的事件按 `(Group, InsertionId)` 保存，
//! 直到被显式重投递并移除。
//!
#[cfg(feature = "in-memory")]
mod in_memory;

#[cfg(feature = "in-memory")]
pub use in_memory::InMemoryEventDeadLetters;

use crate::error::EventBusResult as Result;
use crate::event::Event;
use crate::registration::Group;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 死信条目标识，存储时生成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsertionId(Uuid);

impl InsertionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for InsertionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for InsertionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for InsertionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 死信存储协议
#[async_trait]
pub trait EventDeadLetters<E: Event>: Send + Sync {
    async fn store(&self, group: &Group, event: &E) -> Result<InsertionId>;

    /// 移除条目；不存在时无副作用
    async fn remove(&self, group: &Group, insertion_id: &InsertionId) -> Result<()>;

    async fn failed_event(&self, group: &Group, insertion_id: &InsertionId) -> Result<Option<E>>;

    async fn failed_ids(&self, group: &Group) -> Result<Vec<InsertionId>>;

    async fn groups_with_failed_events(&self) -> Result<Vec<Group>>;

    async fn contain_events(&self) -> Result<bool>;
}
