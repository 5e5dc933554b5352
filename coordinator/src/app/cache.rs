//! Bounded record of the last operation per tenant.
//!
//! The map lives in a slot arena with an index and a free list. Each slot
//! carries a last-used tick and the least recently used slot is evicted when
//! an insert pushes the map over capacity.

use core::hash::Hash;
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    last_used: u64,
}

/// Arena-backed LRU map with a fixed capacity.
#[derive(Debug)]
pub struct BoundedLru<K, V> {
    capacity: usize,
    slots: Vec<Option<Slot<K, V>>>,
    index: HashMap<K, usize>,
    free: Vec<usize>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V> BoundedLru<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            tick: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    const fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Inserts or overwrites `key`, evicting the least recently used entries above capacity.
    pub fn insert(&mut self, key: K, value: V) {
        let last_used = self.next_tick();
        if let Some(slot) = self
            .index
            .get(&key)
            .and_then(|&at| self.slots.get_mut(at))
            .and_then(Option::as_mut)
        {
            slot.value = value;
            slot.last_used = last_used;
            return;
        }

        let slot = Some(Slot {
            key: key.clone(),
            value,
            last_used,
        });
        let at = match self.free.pop() {
            Some(at) => {
                if let Some(free_slot) = self.slots.get_mut(at) {
                    *free_slot = slot;
                }
                at
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.index.insert(key, at);

        while self.index.len() > self.capacity {
            self.evict_least_recent();
        }
    }

    /// Looks up `key` and marks it as used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let at = *self.index.get(key)?;
        let tick = self.next_tick();
        let slot = self.slots.get_mut(at)?.as_mut()?;
        slot.last_used = tick;
        Some(&slot.value)
    }

    /// Looks up `key` without touching its recency.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        let at = *self.index.get(key)?;
        self.slots.get(at)?.as_ref().map(|slot| &slot.value)
    }

    fn evict_least_recent(&mut self) {
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(at, slot)| slot.as_ref().map(|slot| (at, slot.last_used)))
            .min_by_key(|&(_, last_used)| last_used)
            .map(|(at, _)| at);
        let Some(at) = victim else {
            return;
        };
        if let Some(slot) = self.slots.get_mut(at).and_then(Option::take) {
            self.index.remove(&slot.key);
            self.free.push(at);
        }
    }
}

/// Operation kinds recorded per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Spawn,
    Destroy,
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub action: Action,
    /// Status or error code the operation ended with.
    pub outcome: String,
    pub at: DateTime<Utc>,
}

/// Shared, lock-guarded [`BoundedLru`] of tenant id to its last operation.
#[derive(Debug)]
pub struct RecentOperations {
    inner: Mutex<BoundedLru<String, OperationRecord>>,
}

impl RecentOperations {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedLru::new(capacity)),
        }
    }

    pub fn record(&self, tenant_id: &str, action: Action, outcome: &str) {
        let record = OperationRecord {
            action,
            outcome: outcome.to_owned(),
            at: Utc::now(),
        };
        if let Ok(mut cache) = self.inner.lock() {
            cache.insert(tenant_id.to_owned(), record);
        }
    }

    #[must_use]
    pub fn last(&self, tenant_id: &str) -> Option<OperationRecord> {
        self.inner
            .lock()
            .ok()?
            .peek(&tenant_id.to_owned())
            .cloned()
    }
}
