//! 事件分发器（EventDispatcher）
//!
//! 一次 `dispatch` 同时走两条分支：
//! - 本地分支：对每个 key 取本地监听器快照，只执行同步监听器，失败记录后吞掉；
//! - 远端分支：事件编码一次，以空路由键发布到主交换机（组广播），
//!   并按每个 key 的路由键各发布一次（key 分发）。
//!
//! 组广播失败时事件写入哨兵组 `Group::dispatching_failure()` 的死信后返回错误；
//! key 分发失败只返回错误，不写死信。
//!
use crate::broker::{
    BasicProperties, BindingSpecification, EMPTY_ROUTING_KEY, ExchangeSpecification, ExchangeType,
    OutboundMessage, QueueSpecification, Sender,
};
use crate::dead_letters::EventDeadLetters;
use crate::error::EventBusResult as Result;
use crate::event::{Event, EventBusId, EventSerializer};
use crate::listener::{
    EventListener, ExecutionContext, ExecutionMode, ListenerExecutor, LocalListenerRegistry,
};
use crate::registration::{Group, NamingStrategy, RegistrationKey, RoutingKey};
use bon::Builder;
use futures_util::{StreamExt, stream};
use std::collections::HashSet;
use std::sync::Arc;

/// 标识消息来源总线实例的消息头
pub const EVENT_BUS_ID_HEADER: &str = "eventBusId";

#[derive(Builder)]
pub struct EventDispatcher<E: Event> {
    event_bus_id: EventBusId,
    #[builder(default)]
    naming: NamingStrategy,
    sender: Arc<dyn Sender>,
    serializer: Arc<dyn EventSerializer<E>>,
    local_listeners: LocalListenerRegistry<E>,
    dead_letters: Arc<dyn EventDeadLetters<E>>,
    #[builder(default)]
    executor: ListenerExecutor,
    #[builder(default = 10)]
    execution_rate: usize,
}

impl<E: Event> EventDispatcher<E> {
    /// 声明主交换机、死信交换机与死信队列；可重复调用
    pub async fn start(&self) -> Result<()> {
        self.sender
            .declare_exchange(
                ExchangeSpecification::builder()
                    .name(self.naming.exchange())
                    .exchange_type(ExchangeType::Direct)
                    .durable(true)
                    .build(),
            )
            .await?;
        self.sender
            .declare_exchange(
                ExchangeSpecification::builder()
                    .name(self.naming.dead_letter_exchange())
                    .exchange_type(ExchangeType::Direct)
                    .durable(true)
                    .build(),
            )
            .await?;
        self.sender
            .declare_queue(
                QueueSpecification::builder()
                    .name(self.naming.dead_letter_queue())
                    .durable(true)
                    .build(),
            )
            .await?;
        self.sender
            .bind(
                BindingSpecification::builder()
                    .exchange(self.naming.dead_letter_exchange())
                    .queue(self.naming.dead_letter_queue())
                    .routing_key(EMPTY_ROUTING_KEY)
                    .build(),
            )
            .await
    }

    pub async fn dispatch(&self, event: &E, keys: &HashSet<RegistrationKey>) -> Result<()> {
        let ((), remote) = tokio::join!(
            self.dispatch_to_local_listeners(event, keys),
            self.dispatch_to_remote_listeners(event, keys),
        );
        remote
    }

    async fn dispatch_to_local_listeners(&self, event: &E, keys: &HashSet<RegistrationKey>) {
        let work: Vec<(RegistrationKey, Arc<dyn EventListener<E>>)> = keys
            .iter()
            .flat_map(|key| {
                self.local_listeners
                    .get_local_listeners(key)
                    .into_iter()
                    .filter(|listener| listener.execution_mode() == ExecutionMode::Synchronous)
                    .map(move |listener| (key.clone(), listener))
            })
            .collect();

        if work.is_empty() {
            return;
        }

        stream::iter(work)
            .for_each_concurrent(Some(self.execution_rate), |(key, listener)| async move {
                let context = ExecutionContext::Key(key.clone());
                if let Err(err) = self
                    .executor
                    .execute(listener.as_ref(), &context, event)
                    .await
                {
                    tracing::error!(
                        event_id = %event.event_id(),
                        event_type = event.event_type(),
                        username = %event.username(),
                        registration_key = %key,
                        listener = listener.name(),
                        error = %err,
                        "local synchronous listener failed"
                    );
                }
            })
            .await;
    }

    async fn dispatch_to_remote_listeners(
        &self,
        event: &E,
        keys: &HashSet<RegistrationKey>,
    ) -> Result<()> {
        let payload: Arc<[u8]> = Arc::from(self.serializer.to_json(event)?.into_bytes());

        let (groups, keyed) = tokio::join!(
            self.dispatch_to_groups(event, payload.clone()),
            self.dispatch_to_keys(event, keys, payload),
        );
        groups.and(keyed)
    }

    async fn dispatch_to_groups(&self, event: &E, payload: Arc<[u8]>) -> Result<()> {
        let message = self.message(RoutingKey::empty(), payload);
        let Err(err) = self.sender.send(vec![message]).await else {
            return Ok(());
        };

        tracing::error!(
            event_id = %event.event_id(),
            event_type = event.event_type(),
            username = %event.username(),
            error = %err,
            "group broadcast failed, storing event in dead letters"
        );
        let sentinel = Group::dispatching_failure();
        if let Err(store_err) = self.dead_letters.store(&sentinel, event).await {
            tracing::error!(
                event_id = %event.event_id(),
                group = %sentinel,
                error = %store_err,
                "could not store undispatched event"
            );
        }
        Err(err)
    }

    async fn dispatch_to_keys(
        &self,
        event: &E,
        keys: &HashSet<RegistrationKey>,
        payload: Arc<[u8]>,
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let messages = keys
            .iter()
            .map(|key| self.message(RoutingKey::of(key), payload.clone()))
            .collect();

        self.sender.send(messages).await.inspect_err(|err| {
            tracing::error!(
                event_id = %event.event_id(),
                event_type = event.event_type(),
                username = %event.username(),
                error = %err,
                "key dispatch failed"
            );
        })
    }

    fn message(&self, routing_key: RoutingKey, payload: Arc<[u8]>) -> OutboundMessage {
        OutboundMessage::new(
            self.naming.exchange(),
            routing_key.as_str(),
            BasicProperties::persistent_text_plain()
                .with_header(EVENT_BUS_ID_HEADER, self.event_bus_id.to_string()),
            payload,
        )
    }
}
