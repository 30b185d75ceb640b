//! 内存版事件总线示例：一个组监听器（前两次失败后成功）、一个同步 key 监听器，
//! 以及一个始终失败、最终进入死信的组监听器。
//!
//! 运行：`RUST_LOG=info cargo run -p eventbus-core --example eventbus_inmemory`
use async_trait::async_trait;
use eventbus_core::broker::InMemoryBroker;
use eventbus_core::config::{EventBusConfig, RetryBackoffConfig};
use eventbus_core::dead_letters::{EventDeadLetters, InMemoryEventDeadLetters};
use eventbus_core::event::{Event, EventId, JsonEventSerializer, MailboxId, Username};
use eventbus_core::eventing::EventBus;
use eventbus_core::listener::{EventListener, ExecutionMode};
use eventbus_core::registration::{Group, Registration, RegistrationKey};
use eventbus_macros::event;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[event]
enum MailboxEvent {
    MailboxAdded { mailbox_id: MailboxId },
    MailboxDeletion { mailbox_id: MailboxId },
}

struct SearchIndexer {
    attempts: AtomicUsize,
}

#[async_trait]
impl EventListener<MailboxEvent> for SearchIndexer {
    fn name(&self) -> &str {
        "search-indexer"
    }

    async fn handle(&self, event: &MailboxEvent) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= 2 {
            anyhow::bail!("index not ready (attempt {attempt})");
        }
        println!("indexed {} for {}", event.event_type(), event.username());
        Ok(())
    }
}

struct MailboxCounter {
    seen: AtomicUsize,
}

#[async_trait]
impl EventListener<MailboxEvent> for MailboxCounter {
    fn name(&self) -> &str {
        "mailbox-counter"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Synchronous
    }

    async fn handle(&self, _event: &MailboxEvent) -> anyhow::Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenQuota;

#[async_trait]
impl EventListener<MailboxEvent> for BrokenQuota {
    fn name(&self) -> &str {
        "broken-quota"
    }

    fn is_handling(&self, event: &MailboxEvent) -> bool {
        matches!(event, MailboxEvent::MailboxDeletion { .. })
    }

    async fn handle(&self, _event: &MailboxEvent) -> anyhow::Result<()> {
        anyhow::bail!("quota store unavailable")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker = InMemoryBroker::new();
    let dead_letters = Arc::new(InMemoryEventDeadLetters::<MailboxEvent>::new());
    let config = EventBusConfig::builder()
        .retry_backoff(
            RetryBackoffConfig::builder()
                .max_retries(3)
                .first_backoff_ms(10)
                .build(),
        )
        .build();

    let bus = EventBus::builder()
        .sender(Arc::new(broker.clone()))
        .receiver_provider(Arc::new(broker.clone()))
        .serializer(Arc::new(JsonEventSerializer::<MailboxEvent>::new()))
        .dead_letters(dead_letters.clone())
        .config(config)
        .build();
    bus.start().await?;

    let indexer = Arc::new(SearchIndexer {
        attempts: AtomicUsize::new(0),
    });
    let counter = Arc::new(MailboxCounter {
        seen: AtomicUsize::new(0),
    });
    bus.register_group(indexer.clone(), Group::new("search-index"))
        .await?;
    bus.register_group(Arc::new(BrokenQuota), Group::new("quota"))
        .await?;

    let bob = Username::new("bob");
    let key = RegistrationKey::User(bob.clone());
    let registration = bus.register_key(counter.clone(), key.clone()).await?;

    bus.dispatch(
        &MailboxEvent::MailboxAdded {
            event_id: EventId::random(),
            username: bob.clone(),
            mailbox_id: MailboxId::new("inbox"),
        },
        &HashSet::from([key.clone()]),
    )
    .await?;
    bus.dispatch(
        &MailboxEvent::MailboxDeletion {
            event_id: EventId::random(),
            username: bob,
            mailbox_id: MailboxId::new("archive"),
        },
        &HashSet::from([key]),
    )
    .await?;

    // 等待重试链结束
    tokio::time::sleep(Duration::from_millis(500)).await;
    registration.unregister().await;

    println!("event bus id:        {}", bus.event_bus_id());
    println!("indexer attempts:    {}", indexer.attempts.load(Ordering::SeqCst));
    println!("key listener calls:  {}", counter.seen.load(Ordering::SeqCst));
    for group in dead_letters.groups_with_failed_events().await? {
        let ids = dead_letters.failed_ids(&group).await?;
        println!("dead letters [{group}]: {}", ids.len());
    }

    bus.stop().await;
    Ok(())
}
