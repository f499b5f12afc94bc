//! Process-wide registry of sessions
//!
//! One reader/writer lock guards the map; it is only held for the map
//! mutation itself. A start first reserves its key with a placeholder and
//! only commits the live session once negotiation and signaling succeeded.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::shared::{DomainError, InstanceId, Result, SessionKey};

enum Slot<T> {
    Starting(InstanceId),
    Live(InstanceId, T),
}

impl<T> Slot<T> {
    fn instance(&self) -> InstanceId {
        match self {
            Slot::Starting(id) | Slot::Live(id, _) => *id,
        }
    }
}

/// Registry of sessions keyed by `{room}_{id}`
pub struct SessionRegistry<T> {
    slots: Arc<RwLock<HashMap<SessionKey, Slot<T>>>>,
}

impl<T> Clone for SessionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Atomically claim a key; fails if any entry (placeholder or live) exists
    pub async fn reserve(&self, key: SessionKey) -> Result<Reservation<T>> {
        let instance = InstanceId::new();
        let mut slots = self.slots.write().await;
        if slots.contains_key(&key) {
            return Err(DomainError::AlreadyExists(format!("session {}", key)));
        }
        slots.insert(key.clone(), Slot::Starting(instance));
        debug!("Reserved session {} ({})", key, instance);

        Ok(Reservation {
            registry: self.clone(),
            key,
            instance,
            settled: false,
        })
    }

    /// Remove whatever is stored under the key
    pub async fn remove(&self, key: &SessionKey) -> bool {
        self.slots.write().await.remove(key).is_some()
    }

    /// Remove the key only if it still belongs to the given instance
    pub async fn remove_instance(&self, key: &SessionKey, instance: InstanceId) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get(key) {
            Some(slot) if slot.instance() == instance => {
                slots.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Whether the key has any entry, including an in-flight start
    pub async fn exists(&self, key: &SessionKey) -> bool {
        self.slots.read().await.contains_key(key)
    }

    pub async fn list(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.slots.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    fn release_now_or_later(&self, key: SessionKey, instance: InstanceId) {
        if let Ok(mut slots) = self.slots.try_write() {
            if matches!(slots.get(&key), Some(slot) if slot.instance() == instance) {
                slots.remove(&key);
            }
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registry = self.clone();
            handle.spawn(async move {
                registry.remove_instance(&key, instance).await;
            });
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SessionRegistry<T> {
    /// Live session stored under the key (placeholders are not returned)
    pub async fn get(&self, key: &SessionKey) -> Option<T> {
        match self.slots.read().await.get(key) {
            Some(Slot::Live(_, value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Every live session, in key order
    pub async fn live(&self) -> Vec<(SessionKey, T)> {
        let slots = self.slots.read().await;
        let mut live: Vec<(SessionKey, T)> = slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Live(_, value) => Some((key.clone(), value.clone())),
                Slot::Starting(_) => None,
            })
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }
}

/// Placeholder claim on a key.
///
/// Dropping an unsettled reservation removes the placeholder.
pub struct Reservation<T>
where
    T: Send + Sync + 'static,
{
    registry: SessionRegistry<T>,
    key: SessionKey,
    instance: InstanceId,
    settled: bool,
}

impl<T> Reservation<T>
where
    T: Send + Sync + 'static,
{
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Replace the placeholder with the live session
    pub async fn commit(mut self, value: T) -> Result<()> {
        self.settled = true;
        let mut slots = self.registry.slots.write().await;
        match slots.get(&self.key) {
            Some(Slot::Starting(id)) if *id == self.instance => {
                slots.insert(self.key.clone(), Slot::Live(self.instance, value));
                debug!("Committed session {}", self.key);
                Ok(())
            }
            _ => Err(DomainError::InvalidStateTransition(format!(
                "reservation for {} no longer held",
                self.key
            ))),
        }
    }

    /// Drop the placeholder right away
    pub async fn release(mut self) {
        self.settled = true;
        self.registry.remove_instance(&self.key, self.instance).await;
        debug!("Released reservation {}", self.key);
    }
}

impl<T> Drop for Reservation<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.settled {
            self.registry
                .release_now_or_later(self.key.clone(), self.instance);
        }
    }
}
