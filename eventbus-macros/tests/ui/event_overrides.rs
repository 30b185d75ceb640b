use eventbus_core::event::{Event, EventId, Username};
use eventbus_macros::event;
use serde::{Deserialize, Serialize};

#[event]
#[derive(Debug, Clone, Serialize, Deserialize)]
enum QuotaEvent {
    #[event(event_type = "quota.updated")]
    QuotaUsageUpdated {
        event_id: EventId,
        username: Username,
        used: u64,
    },
    #[event(noop = true)]
    Noop { username: Username },
}

fn main() {
    let noop = QuotaEvent::Noop {
        event_id: EventId::random(),
        username: Username::new("alice"),
    };
    assert!(noop.is_noop());
    assert_eq!(noop.event_type(), "Noop");

    let updated = QuotaEvent::QuotaUsageUpdated {
        event_id: EventId::random(),
        username: Username::new("alice"),
        used: 42,
    };
    assert_eq!(updated.event_type(), "quota.updated");
    assert!(!updated.is_noop());
}
