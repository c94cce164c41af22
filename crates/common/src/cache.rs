// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! In-process caches for metadata that never changes for the lifetime of a fork: token
//! metadata and chain properties.
//!
//! Unlike a disk-backed cache, these never expire and never invalidate: a token's
//! `decimals`/`symbol` or a chain's native-currency properties are immutable for the
//! life of the process, so the first successful read wins and every later request for
//! the same key is served from memory.

use std::hash::Hash;

use dashmap::DashMap;

/// A first-write-wins, in-memory cache keyed by `K`.
///
/// `get_or_try_init` is the only way to populate an entry: concurrent misses on the
/// same key race to compute the value, but only one of them is kept.
#[derive(Debug)]
pub struct ProcessCache<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> Default for ProcessCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<K, V> ProcessCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Construct an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Return the cached value for `key`, computing and storing it via `init` on a
    /// miss. If `init` fails, nothing is cached and the error is returned.
    pub fn get_or_try_init<E>(&self, key: K, init: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = init()?;
        // `entry` rather than `insert` so a concurrent winner is not clobbered.
        let value = self.entries.entry(key).or_insert(value).value().clone();
        Ok(value)
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_wins() {
        let cache: ProcessCache<u32, &'static str> = ProcessCache::new();
        let first: Result<_, ()> = cache.get_or_try_init(1, || Ok("first"));
        let second: Result<_, ()> = cache.get_or_try_init(1, || Ok("second"));
        assert_eq!(first.unwrap(), "first");
        assert_eq!(second.unwrap(), "first");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_init_does_not_poison_the_entry() {
        let cache: ProcessCache<u32, &'static str> = ProcessCache::new();
        let failed: Result<&'static str, &'static str> = cache.get_or_try_init(1, || Err("boom"));
        assert!(failed.is_err());
        assert!(cache.get(&1).is_none());

        let ok: Result<_, &'static str> = cache.get_or_try_init(1, || Ok("later"));
        assert_eq!(ok.unwrap(), "later");
    }
}
