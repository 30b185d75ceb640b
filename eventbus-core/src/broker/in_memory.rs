//! 内存版 broker（InMemoryBroker）
//!
//! 在单进程内模拟事件总线依赖的 broker 语义：
//! - direct / fanout 交换机，按绑定路由；无匹配绑定的消息被丢弃；
//! - 命名队列，多个消费者竞争消费，`prefetch` 限制未确认投递数量；
//! - `nack(requeue = false)` 按队列的死信交换机参数转投；
//! - `auto_delete` 队列在最后一个消费者关闭后删除。
//!
//! 适用于测试、示例与本地开发；`fail_publishes` 可模拟发布失败。

use super::{
    AcknowledgableDelivery, Acknowledger, BasicProperties, BindingSpecification,
    ExchangeSpecification, ExchangeType, OutboundMessage, QueueSpecification, Receiver,
    ReceiverProvider, Sender,
};
use crate::error::{EventBusError, EventBusResult as Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_core::stream::BoxStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// 进程内 broker，克隆后共享同一份状态
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: DashMap<String, ExchangeState>,
    queues: DashMap<String, Arc<QueueState>>,
    publish_failures: AtomicBool,
}

struct ExchangeState {
    spec: ExchangeSpecification,
    bindings: Vec<BindingSpecification>,
}

struct QueueState {
    spec: QueueSpecification,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    ready: AtomicUsize,
    consumers: AtomicUsize,
    deleted: CancellationToken,
}

#[derive(Clone)]
struct Envelope {
    routing_key: String,
    properties: BasicProperties,
    body: Arc<[u8]>,
    redelivered: bool,
}

impl QueueState {
    fn new(spec: QueueSpecification) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            spec,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            ready: AtomicUsize::new(0),
            consumers: AtomicUsize::new(0),
            deleted: CancellationToken::new(),
        }
    }

    fn push(&self, envelope: Envelope) {
        if self.deleted.is_cancelled() {
            return;
        }
        self.ready.fetch_add(1, Ordering::AcqRel);
        // 发送端与接收端同属本结构，不会断开
        let _ = self.tx.send(envelope);
    }
}

impl BrokerState {
    fn route(&self, exchange: &str, envelope: Envelope) -> Result<()> {
        let targets: Vec<String> = {
            let Some(ex) = self.exchanges.get(exchange) else {
                return Err(EventBusError::broker(format!(
                    "exchange not found: {exchange}"
                )));
            };
            ex.bindings
                .iter()
                .filter(|b| match ex.spec.exchange_type {
                    ExchangeType::Direct => b.routing_key == envelope.routing_key,
                    ExchangeType::Fanout => true,
                })
                .map(|b| b.queue.clone())
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!(exchange, routing_key = %envelope.routing_key, "message unroutable, dropped");
        }

        for name in targets {
            if let Some(queue) = self.queues.get(&name).map(|q| Arc::clone(q.value())) {
                queue.push(envelope.clone());
            }
        }
        Ok(())
    }

    fn dead_letter(&self, queue: &QueueState, envelope: Envelope) {
        let Some(dlx) = queue.spec.dead_letter_exchange() else {
            tracing::debug!(queue = %queue.spec.name, "rejected message discarded, no dead letter exchange");
            return;
        };
        let envelope = Envelope {
            redelivered: false,
            ..envelope
        };
        if let Err(err) = self.route(dlx, envelope) {
            tracing::warn!(queue = %queue.spec.name, dead_letter_exchange = dlx, error = %err, "dead lettering failed");
        }
    }

    fn delete_queue(&self, name: &str) {
        if let Some((_, queue)) = self.queues.remove(name) {
            queue.deleted.cancel();
        }
        for mut ex in self.exchanges.iter_mut() {
            ex.bindings.retain(|b| b.queue != name);
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启后所有 `send` 调用返回 broker 错误
    pub fn fail_publishes(&self, enabled: bool) {
        self.state
            .publish_failures
            .store(enabled, Ordering::Release);
    }

    pub fn exchange_exists(&self, name: &str) -> bool {
        self.state.exchanges.contains_key(name)
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state.queues.contains_key(name)
    }

    /// 队列中等待投递的消息数（不含已投递未确认的消息）
    pub fn queue_len(&self, name: &str) -> Option<usize> {
        self.state
            .queues
            .get(name)
            .map(|q| q.ready.load(Ordering::Acquire))
    }

    pub fn bindings(&self, exchange: &str) -> Vec<BindingSpecification> {
        self.state
            .exchanges
            .get(exchange)
            .map(|ex| ex.bindings.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sender for InMemoryBroker {
    async fn declare_exchange(&self, spec: ExchangeSpecification) -> Result<()> {
        match self.state.exchanges.entry(spec.name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().spec.exchange_type != spec.exchange_type {
                    return Err(EventBusError::broker(format!(
                        "exchange {} already declared with another type",
                        spec.name
                    )));
                }
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(exchange = %spec.name, "exchange declared");
                vacant.insert(ExchangeState {
                    spec,
                    bindings: Vec::new(),
                });
            }
        }
        Ok(())
    }

    async fn declare_queue(&self, spec: QueueSpecification) -> Result<()> {
        match self.state.queues.entry(spec.name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().spec != spec {
                    return Err(EventBusError::broker(format!(
                        "queue {} already declared with other arguments",
                        spec.name
                    )));
                }
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(queue = %spec.name, "queue declared");
                vacant.insert(Arc::new(QueueState::new(spec)));
            }
        }
        Ok(())
    }

    async fn bind(&self, binding: BindingSpecification) -> Result<()> {
        if !self.state.queues.contains_key(&binding.queue) {
            return Err(EventBusError::broker(format!(
                "queue not found: {}",
                binding.queue
            )));
        }
        let Some(mut ex) = self.state.exchanges.get_mut(&binding.exchange) else {
            return Err(EventBusError::broker(format!(
                "exchange not found: {}",
                binding.exchange
            )));
        };
        if !ex.bindings.contains(&binding) {
            ex.bindings.push(binding);
        }
        Ok(())
    }

    async fn unbind(&self, binding: BindingSpecification) -> Result<()> {
        let Some(mut ex) = self.state.exchanges.get_mut(&binding.exchange) else {
            return Err(EventBusError::broker(format!(
                "exchange not found: {}",
                binding.exchange
            )));
        };
        ex.bindings.retain(|b| b != &binding);
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        self.state.delete_queue(queue);
        Ok(())
    }

    async fn send(&self, messages: Vec<OutboundMessage>) -> Result<()> {
        if self.state.publish_failures.load(Ordering::Acquire) {
            return Err(EventBusError::broker("publish rejected"));
        }
        for message in messages {
            let envelope = Envelope {
                routing_key: message.routing_key,
                properties: message.properties,
                body: message.body,
                redelivered: false,
            };
            self.state.route(&message.exchange, envelope)?;
        }
        Ok(())
    }
}

impl ReceiverProvider for InMemoryBroker {
    fn create_receiver(&self) -> Arc<dyn Receiver> {
        Arc::new(InMemoryReceiver {
            state: self.state.clone(),
            token: CancellationToken::new(),
        })
    }
}

struct InMemoryReceiver {
    state: Arc<BrokerState>,
    token: CancellationToken,
}

#[async_trait]
impl Receiver for InMemoryReceiver {
    async fn consume_manual_ack(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<BoxStream<'static, AcknowledgableDelivery>> {
        let Some(queue) = self.state.queues.get(queue).map(|q| Arc::clone(q.value())) else {
            return Err(EventBusError::broker(format!("queue not found: {queue}")));
        };
        if self.token.is_cancelled() {
            return Err(EventBusError::broker("receiver closed"));
        }

        let window = Arc::new(Semaphore::new(prefetch.max(1)));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let state = self.state.clone();
        let token = self.token.clone();

        queue.consumers.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = token.cancelled() => break,
                    _ = queue.deleted.cancelled() => break,
                    permit = window.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let envelope = {
                    let mut rx = tokio::select! {
                        _ = token.cancelled() => break,
                        _ = queue.deleted.cancelled() => break,
                        rx = queue.rx.lock() => rx,
                    };
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = queue.deleted.cancelled() => break,
                        envelope = rx.recv() => envelope,
                    }
                };
                let Some(envelope) = envelope else { break };
                queue.ready.fetch_sub(1, Ordering::AcqRel);

                let acknowledger = InMemoryAcknowledger {
                    state: state.clone(),
                    queue: queue.clone(),
                    envelope: envelope.clone(),
                    permit: Mutex::new(Some(permit)),
                };
                let delivery = AcknowledgableDelivery::new(
                    Some(envelope.body),
                    envelope.routing_key,
                    envelope.properties,
                    envelope.redelivered,
                    Box::new(acknowledger),
                );
                // 消费端已放弃流：投递随错误一起被丢弃并重新入队
                if out_tx.send(delivery).is_err() {
                    break;
                }
            }

            let remaining = queue.consumers.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining == 0 && queue.spec.auto_delete && !queue.deleted.is_cancelled() {
                tracing::debug!(queue = %queue.spec.name, "auto-delete queue removed");
                state.delete_queue(&queue.spec.name);
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(out_rx)))
    }

    fn close(&self) {
        self.token.cancel();
    }
}

struct InMemoryAcknowledger {
    state: Arc<BrokerState>,
    queue: Arc<QueueState>,
    envelope: Envelope,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl InMemoryAcknowledger {
    fn release(&self) {
        self.permit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Acknowledger for InMemoryAcknowledger {
    fn ack(&self) {
        self.release();
    }

    fn nack(&self, requeue: bool) {
        if requeue {
            self.queue.push(Envelope {
                redelivered: true,
                ..self.envelope.clone()
            });
        } else {
            self.state.dead_letter(&self.queue, self.envelope.clone());
        }
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::DEAD_LETTER_EXCHANGE_ARGUMENT;
    use futures_util::StreamExt;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn setup(broker: &InMemoryBroker, queue: QueueSpecification) {
        broker
            .declare_exchange(ExchangeSpecification::builder().name("ex").build())
            .await
            .unwrap();
        let name = queue.name.clone();
        broker.declare_queue(queue).await.unwrap();
        broker
            .bind(
                BindingSpecification::builder()
                    .exchange("ex")
                    .queue(name)
                    .routing_key("k")
                    .build(),
            )
            .await
            .unwrap();
    }

    fn message(routing_key: &str, body: &'static [u8]) -> OutboundMessage {
        OutboundMessage::new(
            "ex",
            routing_key,
            BasicProperties::persistent_text_plain(),
            Arc::from(body),
        )
    }

    #[tokio::test]
    async fn direct_exchange_routes_by_exact_key() {
        let broker = InMemoryBroker::new();
        setup(&broker, QueueSpecification::builder().name("q").build()).await;

        broker
            .send(vec![message("k", b"1"), message("other", b"2")])
            .await
            .unwrap();

        assert_eq!(broker.queue_len("q"), Some(1));
    }

    #[tokio::test]
    async fn send_to_unknown_exchange_fails() {
        let broker = InMemoryBroker::new();
        let err = broker.send(vec![message("k", b"1")]).await.unwrap_err();
        assert!(matches!(err, EventBusError::Broker { .. }));
    }

    #[tokio::test]
    async fn redeclare_with_other_arguments_is_rejected() {
        let broker = InMemoryBroker::new();
        broker
            .declare_queue(QueueSpecification::builder().name("q").durable(true).build())
            .await
            .unwrap();
        broker
            .declare_queue(QueueSpecification::builder().name("q").durable(true).build())
            .await
            .unwrap();
        assert!(
            broker
                .declare_queue(QueueSpecification::builder().name("q").build())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn requeued_delivery_is_marked_redelivered() {
        let broker = InMemoryBroker::new();
        setup(&broker, QueueSpecification::builder().name("q").build()).await;
        broker.send(vec![message("k", b"1")]).await.unwrap();

        let receiver = broker.create_receiver();
        let mut stream = receiver.consume_manual_ack("q", 1).await.unwrap();

        let first = stream.next().await.unwrap();
        assert!(!first.redelivered());
        first.nack(true);
        drop(first);

        let second = timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(second.redelivered());
        second.ack();
        assert_eq!(broker.queue_len("q"), Some(0));
    }

    #[tokio::test]
    async fn rejected_delivery_goes_to_dead_letter_exchange() {
        let broker = InMemoryBroker::new();
        broker
            .declare_exchange(ExchangeSpecification::builder().name("dlx").build())
            .await
            .unwrap();
        broker
            .declare_queue(QueueSpecification::builder().name("dlq").build())
            .await
            .unwrap();
        broker
            .bind(
                BindingSpecification::builder()
                    .exchange("dlx")
                    .queue("dlq")
                    .routing_key("k")
                    .build(),
            )
            .await
            .unwrap();
        let mut arguments = BTreeMap::new();
        arguments.insert(DEAD_LETTER_EXCHANGE_ARGUMENT.to_string(), "dlx".to_string());
        setup(
            &broker,
            QueueSpecification::builder()
                .name("q")
                .arguments(arguments)
                .build(),
        )
        .await;
        broker.send(vec![message("k", b"poison")]).await.unwrap();

        let receiver = broker.create_receiver();
        let mut stream = receiver.consume_manual_ack("q", 1).await.unwrap();
        stream.next().await.unwrap().nack(false);

        assert_eq!(broker.queue_len("q"), Some(0));
        assert_eq!(broker.queue_len("dlq"), Some(1));
    }

    #[tokio::test]
    async fn prefetch_bounds_unacked_deliveries() {
        let broker = InMemoryBroker::new();
        setup(&broker, QueueSpecification::builder().name("q").build()).await;
        broker
            .send(vec![message("k", b"1"), message("k", b"2"), message("k", b"3")])
            .await
            .unwrap();

        let receiver = broker.create_receiver();
        let mut stream = receiver.consume_manual_ack("q", 2).await.unwrap();
        let a = stream.next().await.unwrap();
        let b = stream.next().await.unwrap();

        assert!(
            timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );

        a.ack();
        let c = timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&c.body().unwrap()[..], b"3");
        b.ack();
        c.ack();
    }

    #[tokio::test]
    async fn closing_auto_delete_consumer_removes_queue() {
        let broker = InMemoryBroker::new();
        setup(
            &broker,
            QueueSpecification::builder()
                .name("q")
                .exclusive(true)
                .auto_delete(true)
                .build(),
        )
        .await;

        let receiver = broker.create_receiver();
        let mut stream = receiver.consume_manual_ack("q", 1).await.unwrap();
        receiver.close();

        assert!(
            timeout(Duration::from_secs(1), stream.next())
                .await
                .unwrap()
                .is_none()
        );
        for _ in 0..50 {
            if !broker.queue_exists("q") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!broker.queue_exists("q"));
        assert!(broker.bindings("ex").is_empty());
    }
}
