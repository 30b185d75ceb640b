use super::{EventDeadLetters, InsertionId};
use crate::error::EventBusResult as Result;
use crate::event::Event;
use crate::registration::Group;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

struct DeadLetter<E> {
    insertion_id: InsertionId,
    event: E,
    stored_at: DateTime<Utc>,
}

/// 内存版死信存储，按组保存插入顺序
pub struct InMemoryEventDeadLetters<E: Event> {
    entries: DashMap<Group, Vec<DeadLetter<E>>>,
}

impl<E: Event> Default for InMemoryEventDeadLetters<E> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<E: Event> InMemoryEventDeadLetters<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 组内条目数
    pub fn count(&self, group: &Group) -> usize {
        self.entries.get(group).map(|v| v.len()).unwrap_or(0)
    }

    /// 条目的存储时间
    pub fn stored_at(&self, group: &Group, insertion_id: &InsertionId) -> Option<DateTime<Utc>> {
        self.entries.get(group).and_then(|letters| {
            letters
                .iter()
                .find(|l| &l.insertion_id == insertion_id)
                .map(|l| l.stored_at)
        })
    }
}

#[async_trait]
impl<E: Event> EventDeadLetters<E> for InMemoryEventDeadLetters<E> {
    async fn store(&self, group: &Group, event: &E) -> Result<InsertionId> {
        let insertion_id = InsertionId::random();
        self.entries
            .entry(group.clone())
            .or_default()
            .push(DeadLetter {
                insertion_id,
                event: event.clone(),
                stored_at: Utc::now(),
            });
        tracing::debug!(
            group = %group,
            insertion_id = %insertion_id,
            event_id = %event.event_id(),
            "event stored in dead letters"
        );
        Ok(insertion_id)
    }

    async fn remove(&self, group: &Group, insertion_id: &InsertionId) -> Result<()> {
        if let Entry::Occupied(mut letters) = self.entries.entry(group.clone()) {
            letters.get_mut().retain(|l| &l.insertion_id != insertion_id);
            if letters.get().is_empty() {
                letters.remove();
            }
        }
        Ok(())
    }

    async fn failed_event(&self, group: &Group, insertion_id: &InsertionId) -> Result<Option<E>> {
        Ok(self.entries.get(group).and_then(|letters| {
            letters
                .iter()
                .find(|l| &l.insertion_id == insertion_id)
                .map(|l| l.event.clone())
        }))
    }

    async fn failed_ids(&self, group: &Group) -> Result<Vec<InsertionId>> {
        Ok(self
            .entries
            .get(group)
            .map(|letters| letters.iter().map(|l| l.insertion_id).collect())
            .unwrap_or_default())
    }

    async fn groups_with_failed_events(&self) -> Result<Vec<Group>> {
        let mut groups: Vec<Group> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn contain_events(&self) -> Result<bool> {
        Ok(self.entries.iter().any(|e| !e.value().is_empty()))
    }
}
