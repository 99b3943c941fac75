//! Run-scoped shared key/value store.

use super::Payload;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe associative store shared by every stage and parcel of one run.
///
/// Cloning is cheap and yields another handle to the same store. A new cache
/// is created for every dispatch; nothing is shared across runs.
#[derive(Clone, Default)]
pub struct Cache {
    entries: Arc<DashMap<String, Payload>>,
}

impl Cache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Payload> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    /// Stores a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Payload>) -> Option<Payload> {
        self.entries.insert(key.into(), value.into())
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Payload> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a snapshot of all entries.
    #[must_use]
    pub fn items(&self) -> Vec<(String, Payload)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Visits every entry. The visitor must not touch the cache itself.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &Payload),
    {
        for entry in self.entries.iter() {
            visit(entry.key(), entry.value());
        }
    }

    /// Atomically replaces the value under `key` with `update(current)`.
    ///
    /// Returns the stored value. Concurrent upserts on the same key are
    /// serialized.
    pub fn upsert<F>(&self, key: impl Into<String>, update: F) -> Payload
    where
        F: FnOnce(Option<&Payload>) -> Payload,
    {
        match self.entries.entry(key.into()) {
            Entry::Occupied(mut occupied) => {
                let next = update(Some(occupied.get()));
                occupied.insert(next.clone());
                next
            }
            Entry::Vacant(vacant) => {
                let next = update(None);
                vacant.insert(next.clone());
                next
            }
        }
    }

    /// Atomically adds `by` to the integer stored under `key` (missing or
    /// non-integer values count as zero) and returns the new total.
    pub fn increment(&self, key: impl Into<String>, by: i64) -> i64 {
        let next = self.upsert(key, |current| {
            let base = current.and_then(Payload::as_i64).unwrap_or(0);
            Payload::from(base + by)
        });
        next.as_i64().unwrap_or(by)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("count", &self.count()).finish()
    }
}
