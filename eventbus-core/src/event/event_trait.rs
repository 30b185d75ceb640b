use super::{EventId, Username};
use std::fmt;

/// 总线事件需要满足的能力边界
///
/// 事件创建后不可变；同一次发布在系统内只对应一个 `EventId`，
/// 重投递复用同一份序列化形态。
pub trait Event: Clone + fmt::Debug + Send + Sync + 'static {
    /// 事件唯一标识
    fn event_id(&self) -> &EventId;

    /// 事件所属用户
    fn username(&self) -> &Username;

    /// 事件类型（默认为变体名，如 `MailboxAdded`）
    fn event_type(&self) -> &str;

    /// 空操作事件不会被分发
    fn is_noop(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::Event;
    use crate::event::{EventId, Username};
    use eventbus_macros::event;

    #[event]
    enum QuotaEvent {
        QuotaUsageUpdated {
            used: u64,
        },
        #[event(event_type = "quota.reset", noop = true)]
        QuotaReset {},
    }

    #[test]
    fn generated_impl_reads_common_fields() {
        let id = EventId::random();
        let updated = QuotaEvent::QuotaUsageUpdated {
            event_id: id,
            username: Username::new("bob"),
            used: 10,
        };
        assert_eq!(updated.event_id(), &id);
        assert_eq!(updated.username().as_str(), "bob");
        assert_eq!(updated.event_type(), "QuotaUsageUpdated");
        assert!(!updated.is_noop());

        let reset = QuotaEvent::QuotaReset {
            event_id: EventId::random(),
            username: Username::new("bob"),
        };
        assert_eq!(reset.event_type(), "quota.reset");
        assert!(reset.is_noop());
    }
}
