//! 组注册（GroupRegistration）
//!
//! 一个组对应一个持久工作队列 `<prefix>-workQueue-<group>`，以空路由键绑定到主交换机，
//! 因此每次组广播都会进入该队列；多个节点注册同一组时竞争消费，每个事件只由一个节点处理。
//!
//! 单条投递的处理流程：
//! 1. 读取 `retry-count` 消息头；
//! 2. 解码事件，空载荷或解码失败时拒绝且不重新入队（经队列参数进入死信队列）；
//! 3. 按重试次数等待；
//! 4. 执行监听器，成功则确认；
//! 5. 失败交给 `GroupConsumerRetry`（重投或写死信）后确认。
//!
use crate::broker::{
    AcknowledgableDelivery, BindingSpecification, DEAD_LETTER_EXCHANGE_ARGUMENT,
    EMPTY_ROUTING_KEY, QueueSpecification, Receiver, Sender,
};
use crate::config::RetryBackoffConfig;
use crate::dead_letters::EventDeadLetters;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::{Event, EventSerializer};
use crate::listener::{EventListener, ExecutionContext, ListenerExecutor};
use crate::registration::{Group, NamingStrategy, Registration};
use crate::retry::{GroupConsumerRetry, WaitDelayGenerator, retry_count_of, retry_with_backoff};
use async_trait::async_trait;
use bon::bon;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// 组注册的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Created,
    Starting,
    Consuming,
    Unregistered,
}

type UnregisterCallback = Box<dyn FnOnce() + Send>;

struct Lifecycle {
    state: RegistrationState,
    token: Option<CancellationToken>,
    on_unregister: Option<UnregisterCallback>,
}

pub struct GroupRegistration<E: Event> {
    group: Group,
    work_queue: String,
    naming: NamingStrategy,
    sender: Arc<dyn Sender>,
    receiver: Arc<dyn Receiver>,
    retry_backoff: RetryBackoffConfig,
    execution_rate: usize,
    processor: DeliveryProcessor<E>,
    lifecycle: Mutex<Lifecycle>,
}

/// 单条投递的处理逻辑；消费任务持有其克隆，不反向引用注册本身
struct DeliveryProcessor<E: Event> {
    group: Group,
    listener: Arc<dyn EventListener<E>>,
    serializer: Arc<dyn EventSerializer<E>>,
    retry: Arc<GroupConsumerRetry<E>>,
    delay: WaitDelayGenerator,
    executor: ListenerExecutor,
}

impl<E: Event> Clone for DeliveryProcessor<E> {
    fn clone(&self) -> Self {
        Self {
            group: self.group.clone(),
            listener: self.listener.clone(),
            serializer: self.serializer.clone(),
            retry: self.retry.clone(),
            delay: self.delay.clone(),
            executor: self.executor,
        }
    }
}

#[bon]
impl<E: Event> GroupRegistration<E> {
    #[builder]
    pub fn new(
        group: Group,
        listener: Arc<dyn EventListener<E>>,
        sender: Arc<dyn Sender>,
        receiver: Arc<dyn Receiver>,
        serializer: Arc<dyn EventSerializer<E>>,
        dead_letters: Arc<dyn EventDeadLetters<E>>,
        #[builder(default)] naming: NamingStrategy,
        #[builder(default)] retry_backoff: RetryBackoffConfig,
        #[builder(default = 10)] execution_rate: usize,
        on_unregister: Option<UnregisterCallback>,
    ) -> Self {
        let retry = GroupConsumerRetry::new(
            sender.clone(),
            &naming,
            group.clone(),
            retry_backoff.clone(),
            dead_letters,
            serializer.clone(),
        );
        let processor = DeliveryProcessor {
            group: group.clone(),
            listener,
            serializer,
            retry: Arc::new(retry),
            delay: WaitDelayGenerator::new(retry_backoff.clone()),
            executor: ListenerExecutor,
        };

        Self {
            work_queue: naming.work_queue(&group),
            group,
            naming,
            sender,
            receiver,
            retry_backoff,
            execution_rate,
            processor,
            lifecycle: Mutex::new(Lifecycle {
                state: RegistrationState::Created,
                token: None,
                on_unregister,
            }),
        }
    }
}

impl<E: Event> GroupRegistration<E> {
    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn work_queue(&self) -> &str {
        &self.work_queue
    }

    pub async fn state(&self) -> RegistrationState {
        self.lifecycle.lock().await.state
    }

    /// 声明工作队列与重试交换机并开始消费；整个过程按退避参数重试
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state != RegistrationState::Created {
                return Err(EventBusError::invalid_state(format!(
                    "group {} can not be started from {:?}",
                    self.group, lifecycle.state
                )));
            }
            lifecycle.state = RegistrationState::Starting;
        }

        let started = retry_with_backoff(&self.retry_backoff, "group registration start", || {
            self.declare_and_consume()
        })
        .await;

        let mut lifecycle = self.lifecycle.lock().await;
        let stream = match started {
            Ok(stream) => stream,
            Err(err) => {
                if lifecycle.state == RegistrationState::Starting {
                    lifecycle.state = RegistrationState::Created;
                }
                tracing::error!(group = %self.group, error = %err, "group registration could not start");
                return Err(err);
            }
        };

        // 启动期间已被退订
        if lifecycle.state == RegistrationState::Unregistered {
            self.receiver.close();
            return Ok(());
        }

        let token = CancellationToken::new();
        tokio::spawn(consume(
            self.processor.clone(),
            stream,
            token.clone(),
            self.execution_rate,
        ));
        lifecycle.token = Some(token);
        lifecycle.state = RegistrationState::Consuming;
        tracing::info!(group = %self.group, work_queue = %self.work_queue, "group registration started");
        Ok(())
    }

    async fn declare_and_consume(&self) -> Result<BoxStream<'static, AcknowledgableDelivery>> {
        let mut arguments = BTreeMap::new();
        arguments.insert(
            DEAD_LETTER_EXCHANGE_ARGUMENT.to_string(),
            self.naming.dead_letter_exchange(),
        );
        self.sender
            .declare_queue(
                QueueSpecification::builder()
                    .name(self.work_queue.clone())
                    .durable(true)
                    .arguments(arguments)
                    .build(),
            )
            .await?;
        self.sender
            .bind(
                BindingSpecification::builder()
                    .exchange(self.naming.exchange())
                    .queue(self.work_queue.clone())
                    .routing_key(EMPTY_ROUTING_KEY)
                    .build(),
            )
            .await?;
        self.processor
            .retry
            .create_retry_exchange(&self.work_queue)
            .await?;
        self.receiver
            .consume_manual_ack(&self.work_queue, self.execution_rate)
            .await
    }

    /// 以重试次数 0 重新投递事件（仅本组会收到）
    pub async fn re_deliver(&self, event: &E) -> Result<()> {
        self.processor
            .retry
            .retry_or_store_to_dead_letter(event, 0)
            .await
    }
}

async fn consume<E: Event>(
    processor: DeliveryProcessor<E>,
    stream: BoxStream<'static, AcknowledgableDelivery>,
    token: CancellationToken,
    execution_rate: usize,
) {
    let cancelled = async move { token.cancelled().await };
    stream
        .take_until(cancelled)
        .for_each_concurrent(Some(execution_rate), |delivery| processor.deliver(delivery))
        .await;
    tracing::debug!(group = %processor.group, "group consumer stopped");
}

impl<E: Event> DeliveryProcessor<E> {
    async fn deliver(&self, delivery: AcknowledgableDelivery) {
        let retry_count = retry_count_of(delivery.properties());

        let Some(payload) = delivery.body().filter(|body| !body.is_empty()).cloned() else {
            tracing::warn!(group = %self.group, "delivery without payload rejected");
            delivery.nack(false);
            return;
        };

        let event = match self.serializer.from_bytes(&payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(
                    group = %self.group,
                    retry_count,
                    error = %err,
                    "delivery can not be deserialized, rejected"
                );
                delivery.nack(false);
                return;
            }
        };

        self.delay.delay_if_have_to(retry_count).await;

        let context = ExecutionContext::Group(self.group.clone());
        let Err(cause) = self
            .executor
            .execute(self.listener.as_ref(), &context, &event)
            .await
        else {
            delivery.ack();
            return;
        };

        match self
            .retry
            .handle_retry(&event, Some(payload), retry_count, &cause)
            .await
        {
            Ok(()) => delivery.ack(),
            Err(err) => {
                tracing::error!(
                    group = %self.group,
                    event_id = %event.event_id(),
                    retry_count,
                    error = %err,
                    "retry handling failed, delivery rejected"
                );
                delivery.nack(false);
            }
        }
    }
}

#[async_trait]
impl<E: Event> Registration for GroupRegistration<E> {
    async fn unregister(&self) {
        let (token, on_unregister) = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state == RegistrationState::Unregistered {
                return;
            }
            lifecycle.state = RegistrationState::Unregistered;
            (lifecycle.token.take(), lifecycle.on_unregister.take())
        };

        if let Some(token) = token {
            token.cancel();
        }
        self.receiver.close();
        if let Some(callback) = on_unregister {
            callback();
        }
        tracing::info!(group = %self.group, "group registration unregistered");
    }
}

impl<E: Event> fmt::Debug for GroupRegistration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRegistration")
            .field("group", &self.group)
            .field("work_queue", &self.work_queue)
            .finish()
    }
}
