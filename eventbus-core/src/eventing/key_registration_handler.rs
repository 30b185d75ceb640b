//! key 注册（KeyRegistrationHandler）
//!
//! 每个总线实例拥有一个独占、自动删除的 key 队列 `<prefix>-eventbus-<bus id>`。
//! 某个 key 出现第一个本地监听器时，把该 key 的路由键绑定到这个队列；
//! 最后一个监听器移除时解绑。
//!
//! 收到消息后按路由键还原 `RegistrationKey`，执行该 key 下的本地监听器。
//! 消息来自本实例时跳过同步监听器（它们已在分发时执行过）。
//! 失败只记录日志，投递总是被确认。
//!
use super::dispatcher::EVENT_BUS_ID_HEADER;
use crate::broker::{
    AcknowledgableDelivery, BindingSpecification, QueueSpecification, Receiver, Sender,
};
use crate::config::RetryBackoffConfig;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::{Event, EventBusId, EventSerializer};
use crate::listener::{
    EventListener, ExecutionContext, ExecutionMode, ListenerExecutor, LocalListenerRegistry,
    RemovalReference,
};
use crate::registration::{NamingStrategy, Registration, RegistrationKey, RoutingKey, RoutingKeyConverter};
use crate::retry::retry_with_backoff;
use async_trait::async_trait;
use bon::bon;
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, stream};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct KeyRegistrationHandler<E: Event> {
    event_bus_id: EventBusId,
    naming: NamingStrategy,
    queue: String,
    sender: Arc<dyn Sender>,
    receiver: Arc<dyn Receiver>,
    retry_backoff: RetryBackoffConfig,
    execution_rate: usize,
    local_listeners: LocalListenerRegistry<E>,
    processor: KeyDeliveryProcessor<E>,
    token: Mutex<Option<CancellationToken>>,
}

struct KeyDeliveryProcessor<E: Event> {
    event_bus_id: String,
    serializer: Arc<dyn EventSerializer<E>>,
    local_listeners: LocalListenerRegistry<E>,
    executor: ListenerExecutor,
    execution_rate: usize,
}

impl<E: Event> Clone for KeyDeliveryProcessor<E> {
    fn clone(&self) -> Self {
        Self {
            event_bus_id: self.event_bus_id.clone(),
            serializer: self.serializer.clone(),
            local_listeners: self.local_listeners.clone(),
            executor: self.executor,
            execution_rate: self.execution_rate,
        }
    }
}

#[bon]
impl<E: Event> KeyRegistrationHandler<E> {
    #[builder]
    pub fn new(
        event_bus_id: EventBusId,
        sender: Arc<dyn Sender>,
        receiver: Arc<dyn Receiver>,
        serializer: Arc<dyn EventSerializer<E>>,
        local_listeners: LocalListenerRegistry<E>,
        #[builder(default)] naming: NamingStrategy,
        #[builder(default)] retry_backoff: RetryBackoffConfig,
        #[builder(default = 10)] execution_rate: usize,
    ) -> Self {
        let processor = KeyDeliveryProcessor {
            event_bus_id: event_bus_id.to_string(),
            serializer,
            local_listeners: local_listeners.clone(),
            executor: ListenerExecutor,
            execution_rate,
        };
        Self {
            queue: naming.key_queue(&event_bus_id),
            event_bus_id,
            naming,
            sender,
            receiver,
            retry_backoff,
            execution_rate,
            local_listeners,
            processor,
            token: Mutex::new(None),
        }
    }
}

impl<E: Event> KeyRegistrationHandler<E> {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 声明 key 队列并开始消费；重复调用无副作用
    pub async fn start(&self) -> Result<()> {
        let mut token = self.token.lock().await;
        if token.is_some() {
            return Ok(());
        }

        let stream = retry_with_backoff(&self.retry_backoff, "key registration start", || {
            self.declare_and_consume()
        })
        .await?;

        let cancel = CancellationToken::new();
        tokio::spawn(consume(self.processor.clone(), stream, cancel.clone()));
        *token = Some(cancel);
        tracing::info!(event_bus_id = %self.event_bus_id, queue = %self.queue, "key registration handler started");
        Ok(())
    }

    async fn declare_and_consume(&self) -> Result<BoxStream<'static, AcknowledgableDelivery>> {
        self.sender
            .declare_queue(
                QueueSpecification::builder()
                    .name(self.queue.clone())
                    .durable(false)
                    .exclusive(true)
                    .auto_delete(true)
                    .build(),
            )
            .await?;
        self.receiver
            .consume_manual_ack(&self.queue, self.execution_rate)
            .await
    }

    /// 停止消费、删除 key 队列并清空本地监听器
    pub async fn stop(&self) {
        if let Some(token) = self.token.lock().await.take() {
            token.cancel();
        }
        self.receiver.close();
        if let Err(err) = self.sender.delete_queue(&self.queue).await {
            tracing::warn!(queue = %self.queue, error = %err, "key queue could not be deleted");
        }
        self.local_listeners.remove_all();
    }

    pub async fn register(
        &self,
        listener: Arc<dyn EventListener<E>>,
        key: RegistrationKey,
    ) -> Result<KeyRegistration<E>> {
        if self.token.lock().await.is_none() {
            return Err(EventBusError::invalid_state(
                "key registration handler is not started",
            ));
        }

        let local = self.local_listeners.add_listener(key.clone(), listener);
        let binding = BindingSpecification::builder()
            .exchange(self.naming.exchange())
            .queue(self.queue.clone())
            .routing_key(RoutingKey::of(&key).as_str())
            .build();

        if local.is_first_listener() {
            let bound = retry_with_backoff(&self.retry_backoff, "key binding", || {
                self.sender.bind(binding.clone())
            })
            .await;
            if let Err(err) = bound {
                local.removal().remove();
                tracing::error!(registration_key = %key, error = %err, "key binding failed");
                return Err(err);
            }
        }

        Ok(KeyRegistration {
            removal: local.into_removal(),
            sender: self.sender.clone(),
            binding,
            unregistered: AtomicBool::new(false),
        })
    }
}

async fn consume<E: Event>(
    processor: KeyDeliveryProcessor<E>,
    stream: BoxStream<'static, AcknowledgableDelivery>,
    token: CancellationToken,
) {
    let cancelled = async move { token.cancelled().await };
    let execution_rate = processor.execution_rate;
    stream
        .take_until(cancelled)
        .for_each_concurrent(Some(execution_rate), |delivery| processor.deliver(delivery))
        .await;
}

impl<E: Event> KeyDeliveryProcessor<E> {
    async fn deliver(&self, delivery: AcknowledgableDelivery) {
        self.process(&delivery).await;
        delivery.ack();
    }

    async fn process(&self, delivery: &AcknowledgableDelivery) {
        let key = match RoutingKeyConverter::to_registration_key(delivery.routing_key()) {
            Ok(key) => key,
            Err(err) => {
                tracing::error!(error = %err, "key delivery with unexpected routing key");
                return;
            }
        };

        let listeners = self.local_listeners.get_local_listeners(&key);
        if listeners.is_empty() {
            return;
        }

        let Some(payload) = delivery.body().filter(|body| !body.is_empty()) else {
            tracing::warn!(registration_key = %key, "key delivery without payload ignored");
            return;
        };
        let event = match self.serializer.from_bytes(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(registration_key = %key, error = %err, "key delivery can not be deserialized");
                return;
            }
        };

        let from_self = delivery
            .properties()
            .header(EVENT_BUS_ID_HEADER)
            .and_then(|v| v.as_str())
            == Some(self.event_bus_id.as_str());

        let context = ExecutionContext::Key(key);
        let event = &event;
        let context = &context;
        stream::iter(listeners)
            .filter(|listener| {
                let skip = from_self && listener.execution_mode() == ExecutionMode::Synchronous;
                async move { !skip }
            })
            .for_each_concurrent(Some(self.execution_rate), |listener| async move {
                if let Err(err) = self
                    .executor
                    .execute(listener.as_ref(), context, event)
                    .await
                {
                    tracing::error!(
                        event_id = %event.event_id(),
                        event_type = event.event_type(),
                        username = %event.username(),
                        context = %context,
                        listener = listener.name(),
                        error = %err,
                        "key listener failed"
                    );
                }
            })
            .await;
    }
}

/// 单个 key 监听器的注册句柄
pub struct KeyRegistration<E: Event> {
    removal: RemovalReference<E>,
    sender: Arc<dyn Sender>,
    binding: BindingSpecification,
    unregistered: AtomicBool,
}

impl<E: Event> KeyRegistration<E> {
    pub fn key(&self) -> &RegistrationKey {
        self.removal.key()
    }
}

impl<E: Event> fmt::Debug for KeyRegistration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRegistration")
            .field("key", self.removal.key())
            .field("binding", &self.binding)
            .finish()
    }
}

#[async_trait]
impl<E: Event> Registration for KeyRegistration<E> {
    async fn unregister(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.removal.remove().is_last_listener_removed() {
            return;
        }
        if let Err(err) = self.sender.unbind(self.binding.clone()).await {
            tracing::error!(
                registration_key = %self.removal.key(),
                error = %err,
                "key unbinding failed"
            );
        }
    }
}
