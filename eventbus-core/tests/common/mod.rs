#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use eventbus_core::broker::InMemoryBroker;
use eventbus_core::config::{EventBusConfig, RetryBackoffConfig};
use eventbus_core::dead_letters::InMemoryEventDeadLetters;
use eventbus_core::event::{EventId, JsonEventSerializer, Username};
use eventbus_core::eventing::EventBus;
use eventbus_core::listener::{EventListener, ExecutionMode};
use eventbus_macros::event;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[event]
#[derive(PartialEq)]
pub enum MailboxEvent {
    MailboxAdded {
        mailbox_id: String,
    },
    MailboxDeletion {
        mailbox_id: String,
        quota_root: String,
    },
    #[event(event_type = "quota.updated")]
    QuotaUsageUpdated {
        used: u64,
    },
    #[event(noop = true)]
    Heartbeat {},
}

pub fn mailbox_added(username: &str, mailbox_id: &str) -> MailboxEvent {
    MailboxEvent::MailboxAdded {
        event_id: EventId::random(),
        username: Username::new(username),
        mailbox_id: mailbox_id.to_string(),
    }
}

pub fn heartbeat() -> MailboxEvent {
    MailboxEvent::Heartbeat {
        event_id: EventId::random(),
        username: Username::new("system"),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 快速退避、无抖动，便于在测试里跑完整个重试链
pub fn fast_retries(max_retries: u32) -> EventBusConfig {
    retries(max_retries, 1)
}

/// 指定首次退避、无抖动
pub fn retries(max_retries: u32, first_backoff_ms: u64) -> EventBusConfig {
    EventBusConfig::builder()
        .retry_backoff(
            RetryBackoffConfig::builder()
                .max_retries(max_retries)
                .first_backoff_ms(first_backoff_ms)
                .jitter_factor(0.0)
                .build(),
        )
        .build()
}

pub struct Node {
    pub bus: Arc<EventBus<MailboxEvent>>,
    pub dead_letters: Arc<InMemoryEventDeadLetters<MailboxEvent>>,
}

/// 在给定 broker 上启动一个总线节点
pub async fn start_node(broker: &InMemoryBroker, config: EventBusConfig) -> Node {
    init_tracing();
    let dead_letters = Arc::new(InMemoryEventDeadLetters::new());
    let bus = Arc::new(
        EventBus::builder()
            .sender(Arc::new(broker.clone()))
            .receiver_provider(Arc::new(broker.clone()))
            .serializer(Arc::new(JsonEventSerializer::<MailboxEvent>::new()))
            .dead_letters(dead_letters.clone())
            .config(config)
            .build(),
    );
    bus.start().await.expect("event bus should start");
    Node { bus, dead_letters }
}

pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// 计数监听器：前 `failures` 次调用失败，之后成功
pub struct CountingListener {
    mode: ExecutionMode,
    failures: usize,
    pub calls: AtomicUsize,
    invoked_at: Mutex<Vec<Instant>>,
}

impl CountingListener {
    pub fn new(mode: ExecutionMode) -> Arc<Self> {
        Self::failing(mode, 0)
    }

    pub fn failing(mode: ExecutionMode, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            mode,
            failures,
            calls: AtomicUsize::new(0),
            invoked_at: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(ExecutionMode::Asynchronous, usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 相邻两次调用之间的间隔
    pub fn gaps(&self) -> Vec<Duration> {
        let invoked_at = self.invoked_at.lock().unwrap();
        invoked_at.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl EventListener<MailboxEvent> for CountingListener {
    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    async fn handle(&self, _event: &MailboxEvent) -> anyhow::Result<()> {
        self.invoked_at.lock().unwrap().push(Instant::now());
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if previous < self.failures {
            return Err(anyhow!("failure #{}", previous + 1));
        }
        Ok(())
    }
}
