//! 事件总线门面（EventBus）
//!
//! 组合分发器、key 注册与组注册，对外提供：
//! - `start` / `stop`：声明拓扑、启动 key 队列消费 / 退订全部注册；
//! - `register_key` / `register_group`：注册本地 key 监听器或分布式组监听器；
//! - `dispatch`：发布事件（空操作事件直接忽略）；
//! - `re_deliver`：把死信中的事件重新投递给原来的组。
//!
//! `start` 之前与 `stop` 之后的操作返回 `EventBusError::NotRunning`。
//!
use super::dispatcher::EventDispatcher;
use super::group_registration::GroupRegistration;
use super::group_registration_handler::GroupRegistrationHandler;
use super::key_registration_handler::{KeyRegistration, KeyRegistrationHandler};
use crate::broker::{ReceiverProvider, Sender};
use crate::config::EventBusConfig;
use crate::dead_letters::EventDeadLetters;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::{Event, EventBusId, EventSerializer};
use crate::listener::{EventListener, LocalListenerRegistry};
use crate::registration::{Group, RegistrationKey};
use bon::bon;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const NOT_STARTED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPED: u8 = 3;

pub struct EventBus<E: Event> {
    event_bus_id: EventBusId,
    config: EventBusConfig,
    dead_letters: Arc<dyn EventDeadLetters<E>>,
    dispatcher: EventDispatcher<E>,
    key_handler: KeyRegistrationHandler<E>,
    group_handler: GroupRegistrationHandler<E>,
    state: AtomicU8,
}

#[bon]
impl<E: Event> EventBus<E> {
    #[builder]
    pub fn new(
        sender: Arc<dyn Sender>,
        receiver_provider: Arc<dyn ReceiverProvider>,
        serializer: Arc<dyn EventSerializer<E>>,
        dead_letters: Arc<dyn EventDeadLetters<E>>,
        #[builder(default)] config: EventBusConfig,
        event_bus_id: Option<EventBusId>,
    ) -> Self {
        let event_bus_id = event_bus_id.unwrap_or_else(EventBusId::random);
        let naming = config.naming_strategy();
        let local_listeners = LocalListenerRegistry::new();

        let dispatcher = EventDispatcher::builder()
            .event_bus_id(event_bus_id)
            .naming(naming.clone())
            .sender(sender.clone())
            .serializer(serializer.clone())
            .local_listeners(local_listeners.clone())
            .dead_letters(dead_letters.clone())
            .execution_rate(config.execution_rate)
            .build();

        let key_handler = KeyRegistrationHandler::builder()
            .event_bus_id(event_bus_id)
            .sender(sender.clone())
            .receiver(receiver_provider.create_receiver())
            .serializer(serializer.clone())
            .local_listeners(local_listeners)
            .naming(naming.clone())
            .retry_backoff(config.retry_backoff.clone())
            .execution_rate(config.execution_rate)
            .build();

        let group_handler = GroupRegistrationHandler::builder()
            .sender(sender)
            .receiver_provider(receiver_provider)
            .serializer(serializer)
            .dead_letters(dead_letters.clone())
            .naming(naming)
            .retry_backoff(config.retry_backoff.clone())
            .execution_rate(config.execution_rate)
            .build();

        Self {
            event_bus_id,
            config,
            dead_letters,
            dispatcher,
            key_handler,
            group_handler,
            state: AtomicU8::new(NOT_STARTED),
        }
    }
}

impl<E: Event> EventBus<E> {
    pub fn event_bus_id(&self) -> &EventBusId {
        &self.event_bus_id
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    pub fn dead_letters(&self) -> &Arc<dyn EventDeadLetters<E>> {
        &self.dead_letters
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn registered_groups(&self) -> Vec<Group> {
        self.group_handler.registered_groups()
    }

    /// 校验配置、声明共享拓扑并启动 key 队列消费
    pub async fn start(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(NOT_STARTED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EventBusError::invalid_state("event bus already started"));
        }

        let started = self.start_components().await;
        self.finish_start(started).await
    }

    async fn start_components(&self) -> Result<()> {
        self.config.validate()?;
        self.dispatcher.start().await?;
        self.key_handler.start().await
    }

    // 只有仍处于 STARTING 才能进入 RUNNING；期间被 stop 时撤销已启动的消费
    async fn finish_start(&self, started: Result<()>) -> Result<()> {
        match started {
            Ok(()) => {
                if self
                    .state
                    .compare_exchange(STARTING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    self.group_handler.stop().await;
                    self.key_handler.stop().await;
                    tracing::warn!(event_bus_id = %self.event_bus_id, "event bus stopped while starting");
                    return Err(EventBusError::NotRunning);
                }
                tracing::info!(event_bus_id = %self.event_bus_id, prefix = %self.config.naming_prefix, "event bus started");
                Ok(())
            }
            Err(err) => {
                let _ = self.state.compare_exchange(
                    STARTING,
                    NOT_STARTED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                tracing::error!(event_bus_id = %self.event_bus_id, error = %err, "event bus could not start");
                Err(err)
            }
        }
    }

    /// 退订全部组、停止 key 消费；重复调用无副作用
    pub async fn stop(&self) {
        if self.state.swap(STOPPED, Ordering::AcqRel) != RUNNING {
            return;
        }
        self.group_handler.stop().await;
        self.key_handler.stop().await;
        tracing::info!(event_bus_id = %self.event_bus_id, "event bus stopped");
    }

    pub async fn register_key(
        &self,
        listener: Arc<dyn EventListener<E>>,
        key: RegistrationKey,
    ) -> Result<KeyRegistration<E>> {
        self.ensure_running()?;
        self.key_handler.register(listener, key).await
    }

    pub async fn register_group(
        &self,
        listener: Arc<dyn EventListener<E>>,
        group: Group,
    ) -> Result<Arc<GroupRegistration<E>>> {
        self.ensure_running()?;
        self.group_handler.register(listener, group).await
    }

    pub async fn dispatch(&self, event: &E, keys: &HashSet<RegistrationKey>) -> Result<()> {
        self.ensure_running()?;
        if event.is_noop() {
            return Ok(());
        }
        self.dispatcher.dispatch(event, keys).await
    }

    /// 单个 key 的便捷分发
    pub async fn dispatch_to(&self, event: &E, key: RegistrationKey) -> Result<()> {
        self.dispatch(event, &HashSet::from([key])).await
    }

    /// 重新投递：哨兵组的事件重新走一次组广播，其他组只投递给该组
    pub async fn re_deliver(&self, group: &Group, event: &E) -> Result<()> {
        self.ensure_running()?;
        if group.is_dispatching_failure() {
            return self.dispatcher.dispatch(event, &HashSet::new()).await;
        }
        self.group_handler
            .retrieve_group_registration(group)?
            .re_deliver(event)
            .await
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EventBusError::NotRunning)
        }
    }
}
