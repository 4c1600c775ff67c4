//! Bounded membership set of harvested message ids
//!
//! Eviction is FIFO on insertion order. The feed only grows in one direction
//! during a session, so the oldest-inserted id is also the one least likely to
//! be rendered again.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::types::MessageId;

#[derive(Debug, Default)]
struct Inner {
    seen: HashMap<MessageId, DateTime<Utc>>,
    order: VecDeque<MessageId>,
}

/// Thread-safe, capacity-bounded dedup cache
#[derive(Debug)]
pub struct DedupCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl DedupCache {
    /// Create a cache remembering at most `capacity` ids (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Whether `id` has been harvested
    pub fn contains(&self, id: &MessageId) -> bool {
        self.lock().seen.contains_key(id)
    }

    /// Record `id`; returns `false` if it was already present
    ///
    /// Check-and-insert is a single critical section, so two callers racing on
    /// the same id see exactly one `true`.
    pub fn insert(&self, id: MessageId) -> bool {
        self.insert_at(id, Utc::now())
    }

    /// Record `id` with an explicit harvest timestamp
    pub fn insert_at(&self, id: MessageId, at: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if inner.seen.contains_key(&id) {
            return false;
        }
        inner.seen.insert(id.clone(), at);
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
                tracing::trace!(message_id = %oldest, "Evicted oldest id from dedup cache");
            }
        }
        true
    }

    /// Forget `id` so it can be harvested again
    pub fn remove(&self, id: &MessageId) -> bool {
        let mut inner = self.lock();
        if inner.seen.remove(id).is_none() {
            return false;
        }
        inner.order.retain(|queued| queued != id);
        true
    }

    /// When `id` was harvested
    pub fn harvested_at(&self, id: &MessageId) -> Option<DateTime<Utc>> {
        self.lock().seen.get(id).copied()
    }

    /// Number of remembered ids
    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    /// Whether nothing has been harvested yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
