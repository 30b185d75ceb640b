use super::EventListener;
use crate::event::Event;
use crate::registration::RegistrationKey;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Listeners<E> = DashMap<RegistrationKey, Vec<ListenerEntry<E>>>;

struct ListenerEntry<E: Event> {
    id: u64,
    listener: Arc<dyn EventListener<E>>,
}

/// 进程内监听器表：`RegistrationKey` → 监听器列表
///
/// 同一 key 下的增删在分片锁内完成，`is_first_listener` / `is_last_listener_removed`
/// 因此可以安全地驱动 broker 绑定与解绑。读取返回快照。
pub struct LocalListenerRegistry<E: Event> {
    listeners: Arc<Listeners<E>>,
    next_id: Arc<AtomicU64>,
}

impl<E: Event> Clone for LocalListenerRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<E: Event> Default for LocalListenerRegistry<E> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// `add_listener` 的结果
pub struct LocalRegistration<E: Event> {
    is_first_listener: bool,
    removal: RemovalReference<E>,
}

impl<E: Event> LocalRegistration<E> {
    /// 是否为该 key 的第一个监听器
    pub fn is_first_listener(&self) -> bool {
        self.is_first_listener
    }

    pub fn removal(&self) -> &RemovalReference<E> {
        &self.removal
    }

    pub fn into_removal(self) -> RemovalReference<E> {
        self.removal
    }
}

/// 移除单个监听器的句柄；重复移除无副作用
pub struct RemovalReference<E: Event> {
    listeners: Arc<Listeners<E>>,
    key: RegistrationKey,
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalResult {
    is_last_listener_removed: bool,
}

impl RemovalResult {
    /// 本次移除后该 key 下是否已无监听器
    pub fn is_last_listener_removed(&self) -> bool {
        self.is_last_listener_removed
    }
}

impl<E: Event> RemovalReference<E> {
    pub fn key(&self) -> &RegistrationKey {
        &self.key
    }

    pub fn remove(&self) -> RemovalResult {
        let mut is_last_listener_removed = false;
        if let Entry::Occupied(mut entries) = self.listeners.entry(self.key.clone()) {
            let before = entries.get().len();
            entries.get_mut().retain(|e| e.id != self.id);
            let removed = entries.get().len() < before;
            if entries.get().is_empty() {
                entries.remove();
                is_last_listener_removed = removed;
            }
        }
        RemovalResult {
            is_last_listener_removed,
        }
    }
}

impl<E: Event> LocalListenerRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(
        &self,
        key: RegistrationKey,
        listener: Arc<dyn EventListener<E>>,
    ) -> LocalRegistration<E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let is_first_listener = {
            let mut entries = self.listeners.entry(key.clone()).or_default();
            let first = entries.is_empty();
            entries.push(ListenerEntry { id, listener });
            first
        };

        LocalRegistration {
            is_first_listener,
            removal: RemovalReference {
                listeners: self.listeners.clone(),
                key,
                id,
            },
        }
    }

    /// 该 key 下监听器的快照，可能为空
    pub fn get_local_listeners(&self, key: &RegistrationKey) -> Vec<Arc<dyn EventListener<E>>> {
        self.listeners
            .get(key)
            .map(|entries| entries.iter().map(|e| e.listener.clone()).collect())
            .unwrap_or_default()
    }

    pub fn remove_all(&self) {
        self.listeners.clear();
    }
}
