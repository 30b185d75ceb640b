use eventbus_core::event::{Event, EventId, Username};
use eventbus_macros::event;

#[event]
#[derive(PartialEq)]
enum MailboxEvent {
    MailboxAdded { mailbox_id: String },
    MailboxDeletion { mailbox_id: String, quota_root: String },
}

fn main() {
    let event = MailboxEvent::MailboxAdded {
        event_id: EventId::random(),
        username: Username::new("bob"),
        mailbox_id: "1".to_string(),
    };
    assert_eq!(event.event_type(), "MailboxAdded");
    assert_eq!(event.username().as_str(), "bob");
    assert!(!event.is_noop());

    let json = serde_json::to_string(&event).unwrap();
    let back: MailboxEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
