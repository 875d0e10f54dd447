// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Create-if-absent child registry.
//!
//! Each manager keeps one [`Registry`] keyed by the value-typed identity of its
//! children. Discovery passes at the same level may complete concurrently on
//! different pool threads and race on the same key; [`Registry::get_or_create`]
//! resolves the race on the `DashMap` shard entry, so exactly one child is ever
//! built per key and only the winner reports `created = true`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

pub struct Registry<K, V> {
    children: DashMap<K, Arc<V>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            children: DashMap::new(),
        }
    }

    /// Return the child for `key`, building it with `make` if absent.
    ///
    /// `make` runs under the shard lock and must not touch this registry.
    /// Start the child after this returns, and only when `created` is `true`.
    pub fn get_or_create<F>(&self, key: K, make: F) -> (Arc<V>, bool)
    where
        F: FnOnce(&K) -> Arc<V>,
    {
        match self.children.entry(key) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let child = make(entry.key());
                entry.insert(Arc::clone(&child));
                (child, true)
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.children.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.children.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Snapshot of the registered keys.
    pub fn keys(&self) -> Vec<K> {
        self.children.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of the registered children.
    ///
    /// Collected before returning so callers can await on children without
    /// holding shard locks.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.children.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
