use super::Group;
use crate::event::EventBusId;

/// 拓扑命名策略：纯函数，由前缀推导各交换机与队列名称
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamingStrategy {
    prefix: String,
}

impl NamingStrategy {
    pub const MAILBOX_EVENT_PREFIX: &'static str = "mailboxEvent";
    pub const JMAP_PREFIX: &'static str = "jmapEvent";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn mailbox_event() -> Self {
        Self::new(Self::MAILBOX_EVENT_PREFIX)
    }

    pub fn jmap() -> Self {
        Self::new(Self::JMAP_PREFIX)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 主交换机（direct，持久）
    pub fn exchange(&self) -> String {
        format!("{}-exchange", self.prefix)
    }

    pub fn dead_letter_exchange(&self) -> String {
        format!("{}-dead-letter-exchange", self.prefix)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}-dead-letter-queue", self.prefix)
    }

    /// 组工作队列：`<prefix>-workQueue-<group>`
    pub fn work_queue(&self, group: &Group) -> String {
        format!("{}-workQueue-{}", self.prefix, group)
    }

    pub fn retry_exchange(&self, group: &Group) -> String {
        format!("{}-retryExchange-{}", self.prefix, group)
    }

    /// 节点级 key 队列（独占、自动删除）
    pub fn key_queue(&self, event_bus_id: &EventBusId) -> String {
        format!("{}-eventbus-{}", self.prefix, event_bus_id)
    }
}

impl Default for NamingStrategy {
    fn default() -> Self {
        Self::mailbox_event()
    }
}
