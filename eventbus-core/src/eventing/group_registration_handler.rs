use super::group_registration::GroupRegistration;
use crate::broker::{ReceiverProvider, Sender};
use crate::config::RetryBackoffConfig;
use crate::dead_letters::EventDeadLetters;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::{Event, EventSerializer};
use crate::listener::EventListener;
use crate::registration::{Group, NamingStrategy, Registration};
use bon::Builder;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

type Registrations<E> = DashMap<Group, Arc<GroupRegistration<E>>>;

/// 管理本节点上的全部组注册：同一组在一个节点上至多注册一次
#[derive(Builder)]
pub struct GroupRegistrationHandler<E: Event> {
    sender: Arc<dyn Sender>,
    receiver_provider: Arc<dyn ReceiverProvider>,
    serializer: Arc<dyn EventSerializer<E>>,
    dead_letters: Arc<dyn EventDeadLetters<E>>,
    #[builder(default)]
    naming: NamingStrategy,
    #[builder(default)]
    retry_backoff: RetryBackoffConfig,
    #[builder(default = 10)]
    execution_rate: usize,
    #[builder(skip = Arc::new(DashMap::new()))]
    registrations: Arc<Registrations<E>>,
}

impl<E: Event> GroupRegistrationHandler<E> {
    pub async fn register(
        &self,
        listener: Arc<dyn EventListener<E>>,
        group: Group,
    ) -> Result<Arc<GroupRegistration<E>>> {
        if group.is_dispatching_failure() {
            return Err(EventBusError::InvalidGroup {
                group,
                reason: "reserved for events that failed to dispatch".to_string(),
            });
        }

        let registration = match self.registrations.entry(group.clone()) {
            Entry::Occupied(_) => return Err(EventBusError::GroupAlreadyRegistered { group }),
            Entry::Vacant(vacant) => {
                let registrations = self.registrations.clone();
                let key = group.clone();
                let registration = Arc::new(
                    GroupRegistration::builder()
                        .group(group.clone())
                        .listener(listener)
                        .sender(self.sender.clone())
                        .receiver(self.receiver_provider.create_receiver())
                        .serializer(self.serializer.clone())
                        .dead_letters(self.dead_letters.clone())
                        .naming(self.naming.clone())
                        .retry_backoff(self.retry_backoff.clone())
                        .execution_rate(self.execution_rate)
                        .on_unregister(Box::new(move || {
                            registrations.remove(&key);
                        }))
                        .build(),
                );
                vacant.insert(registration.clone());
                registration
            }
        };

        if let Err(err) = registration.start().await {
            self.registrations.remove(&group);
            return Err(err);
        }
        Ok(registration)
    }

    pub fn retrieve_group_registration(&self, group: &Group) -> Result<Arc<GroupRegistration<E>>> {
        self.registrations
            .get(group)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| EventBusError::GroupRegistrationNotFound {
                group: group.clone(),
            })
    }

    pub fn registered_groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.registrations.iter().map(|r| r.key().clone()).collect();
        groups.sort();
        groups
    }

    /// 退订全部组
    pub async fn stop(&self) {
        let registrations: Vec<Arc<GroupRegistration<E>>> = self
            .registrations
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for registration in registrations {
            registration.unregister().await;
        }
        self.registrations.clear();
    }
}

#[cfg(all(test, feature = "in-memory"))]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::dead_letters::InMemoryEventDeadLetters;
    use crate::event::{EventBusId, EventId, JsonEventSerializer, Username};
    use crate::eventing::{EventDispatcher, RegistrationState};
    use crate::listener::LocalListenerRegistry;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        id: EventId,
        user: Username,
    }

    impl Event for Ping {
        fn event_id(&self) -> &EventId {
            &self.id
        }
        fn username(&self) -> &Username {
            &self.user
        }
        fn event_type(&self) -> &str {
            "Ping"
        }
    }

    struct Noop;

    #[async_trait]
    impl EventListener<Ping> for Noop {
        async fn handle(&self, _event: &Ping) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn handler() -> (InMemoryBroker, GroupRegistrationHandler<Ping>) {
        let broker = InMemoryBroker::new();
        let dispatcher = EventDispatcher::builder()
            .event_bus_id(EventBusId::random())
            .sender(Arc::new(broker.clone()))
            .serializer(Arc::new(JsonEventSerializer::<Ping>::new()))
            .local_listeners(LocalListenerRegistry::new())
            .dead_letters(Arc::new(InMemoryEventDeadLetters::<Ping>::new()))
            .build();
        dispatcher.start().await.unwrap();

        let handler = GroupRegistrationHandler::builder()
            .sender(Arc::new(broker.clone()))
            .receiver_provider(Arc::new(broker.clone()))
            .serializer(Arc::new(JsonEventSerializer::<Ping>::new()))
            .dead_letters(Arc::new(InMemoryEventDeadLetters::<Ping>::new()))
            .build();
        (broker, handler)
    }

    #[tokio::test]
    async fn registering_declares_work_queue_and_retry_exchange() {
        let (broker, handler) = handler().await;

        let registration = handler
            .register(Arc::new(Noop), Group::new("search-index"))
            .await
            .unwrap();

        assert_eq!(registration.state().await, RegistrationState::Consuming);
        assert!(broker.queue_exists("mailboxEvent-workQueue-search-index"));
        assert!(broker.exchange_exists("mailboxEvent-retryExchange-search-index"));
        assert_eq!(handler.registered_groups(), vec![Group::new("search-index")]);
    }

    #[tokio::test]
    async fn same_group_can_not_be_registered_twice() {
        let (_, handler) = handler().await;
        handler.register(Arc::new(Noop), Group::new("g")).await.unwrap();

        let err = handler
            .register(Arc::new(Noop), Group::new("g"))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::GroupAlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn sentinel_group_is_rejected() {
        let (_, handler) = handler().await;

        let err = handler
            .register(Arc::new(Noop), Group::dispatching_failure())
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::InvalidGroup { .. }));
    }

    #[tokio::test]
    async fn unregister_releases_the_group() {
        let (_, handler) = handler().await;
        let registration = handler.register(Arc::new(Noop), Group::new("g")).await.unwrap();

        registration.unregister().await;

        assert!(matches!(
            handler.retrieve_group_registration(&Group::new("g")),
            Err(EventBusError::GroupRegistrationNotFound { .. })
        ));
        handler.register(Arc::new(Noop), Group::new("g")).await.unwrap();
    }

    #[tokio::test]
    async fn stop_unregisters_everything() {
        let (_, handler) = handler().await;
        let a = handler.register(Arc::new(Noop), Group::new("a")).await.unwrap();
        handler.register(Arc::new(Noop), Group::new("b")).await.unwrap();

        handler.stop().await;

        assert!(handler.registered_groups().is_empty());
        assert_eq!(a.state().await, RegistrationState::Unregistered);
    }
}
