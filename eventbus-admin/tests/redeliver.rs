use anyhow::anyhow;
use async_trait::async_trait;
use eventbus_admin::command_bus::CommandBus;
use eventbus_admin::context::AdminContext;
use eventbus_admin::{
    AdminError, InMemoryCommandBus, RedeliverAllEvents, RedeliverEvent, RedeliverGroupEvents,
    RedeliverService, RedeliveryReport,
};
use eventbus_core::broker::InMemoryBroker;
use eventbus_core::config::{EventBusConfig, RetryBackoffConfig};
use eventbus_core::dead_letters::{EventDeadLetters, InMemoryEventDeadLetters, InsertionId};
use eventbus_core::event::{EventId, JsonEventSerializer, Username};
use eventbus_core::eventing::EventBus;
use eventbus_core::listener::EventListener;
use eventbus_core::registration::Group;
use eventbus_macros::event;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[event]
enum MailboxEvent {
    MailboxAdded { mailbox_id: String },
}

fn mailbox_added(mailbox_id: &str) -> MailboxEvent {
    MailboxEvent::MailboxAdded {
        event_id: EventId::random(),
        username: Username::new("bob"),
        mailbox_id: mailbox_id.to_string(),
    }
}

/// 可切换成功/失败的监听器
#[derive(Default)]
struct ToggleListener {
    failing: AtomicBool,
    succeeded: AtomicUsize,
}

#[async_trait]
impl EventListener<MailboxEvent> for ToggleListener {
    async fn handle(&self, _event: &MailboxEvent) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("index unavailable"));
        }
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    bus: Arc<EventBus<MailboxEvent>>,
    dead_letters: Arc<InMemoryEventDeadLetters<MailboxEvent>>,
    service: Arc<RedeliverService<MailboxEvent>>,
}

async fn fixture() -> Fixture {
    let broker = InMemoryBroker::new();
    let dead_letters = Arc::new(InMemoryEventDeadLetters::new());
    let config = EventBusConfig::builder()
        .retry_backoff(
            RetryBackoffConfig::builder()
                .max_retries(1)
                .first_backoff_ms(1)
                .build(),
        )
        .build();

    let bus = Arc::new(
        EventBus::builder()
            .sender(Arc::new(broker.clone()))
            .receiver_provider(Arc::new(broker))
            .serializer(Arc::new(JsonEventSerializer::<MailboxEvent>::new()))
            .dead_letters(dead_letters.clone())
            .config(config)
            .build(),
    );
    bus.start().await.unwrap();

    let service = Arc::new(RedeliverService::new(bus.clone()));
    Fixture {
        bus,
        dead_letters,
        service,
    }
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread")]
async fn redelivers_dead_letters_back_to_their_group() {
    let fx = fixture().await;
    let group = Group::new("search-index");
    let listener = Arc::new(ToggleListener::default());
    listener.failing.store(true, Ordering::SeqCst);
    fx.bus
        .register_group(listener.clone(), group.clone())
        .await
        .unwrap();

    fx.bus
        .dispatch(&mailbox_added("1"), &HashSet::new())
        .await
        .unwrap();
    eventually("dead letter", || fx.dead_letters.count(&group) == 1).await;

    listener.failing.store(false, Ordering::SeqCst);
    let report = fx.service.redeliver_all().await.unwrap();
    assert_eq!(
        report,
        RedeliveryReport {
            successful: 1,
            failed: 0
        }
    );
    assert!(report.is_complete());

    eventually("listener success", || {
        listener.succeeded.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(!fx.dead_letters.contain_events().await.unwrap());
    fx.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_group_keeps_its_dead_letters() {
    let fx = fixture().await;
    let ghost = Group::new("ghost");
    fx.dead_letters
        .store(&ghost, &mailbox_added("1"))
        .await
        .unwrap();

    let report = fx.service.redeliver_group(&ghost).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.successful, 0);
    assert_eq!(fx.dead_letters.count(&ghost), 1);
    fx.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatching_failures_are_broadcast_again() {
    let fx = fixture().await;
    let sentinel = Group::dispatching_failure();
    let insertion_id = fx
        .dead_letters
        .store(&sentinel, &mailbox_added("1"))
        .await
        .unwrap();

    let report = fx
        .service
        .redeliver_single(&sentinel, &insertion_id)
        .await
        .unwrap();
    assert_eq!(report.successful, 1);
    assert_eq!(fx.dead_letters.count(&sentinel), 0);
    fx.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_entry_is_not_found() {
    let fx = fixture().await;
    let err = fx
        .service
        .redeliver_single(&Group::new("search-index"), &InsertionId::random())
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::DeadLetterNotFound { .. }));
    fx.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn commands_are_routed_to_the_service() {
    let fx = fixture().await;
    let commands = InMemoryCommandBus::new();
    fx.service.register_on(&commands).unwrap();
    let ctx = AdminContext::new().with_actor("ops");

    let sentinel = Group::dispatching_failure();
    let insertion_id = fx
        .dead_letters
        .store(&sentinel, &mailbox_added("1"))
        .await
        .unwrap();
    let report = commands
        .dispatch(
            &ctx,
            RedeliverEvent {
                group: sentinel.clone(),
                insertion_id,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.successful, 1);

    fx.dead_letters
        .store(&sentinel, &mailbox_added("2"))
        .await
        .unwrap();
    let report = commands
        .dispatch(&ctx, RedeliverGroupEvents { group: sentinel })
        .await
        .unwrap();
    assert_eq!(report.successful, 1);

    let report = commands.dispatch(&ctx, RedeliverAllEvents).await.unwrap();
    assert_eq!(report, RedeliveryReport::default());

    let json = serde_json::to_value(report).unwrap();
    assert_eq!(json, serde_json::json!({ "successful": 0, "failed": 0 }));
    fx.bus.stop().await;
}

#[tokio::test]
async fn stopped_bus_fails_redelivery_without_losing_entries() {
    let fx = fixture().await;
    let sentinel = Group::dispatching_failure();
    fx.dead_letters
        .store(&sentinel, &mailbox_added("1"))
        .await
        .unwrap();
    fx.bus.stop().await;

    let report = fx.service.redeliver_all().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(fx.dead_letters.count(&sentinel), 1);
}
