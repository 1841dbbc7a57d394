//! Ordered, uniquely-keyed registry store.
//!
//! Every server-owned collection (projects by name, sessions by id, clients
//! by id) is a `Registry`: an ordered map that rejects duplicate keys on
//! insert and iterates in key order.
//!
//! # Removal-safe traversal
//!
//! Bulk destructive operations (kill every project, detach every session)
//! must tolerate removal of the current element mid-traversal. Direct
//! iteration over a `BTreeMap` cannot do that, so callers take a
//! [`Registry::keys_snapshot`] first and then act on each key, re-checking
//! presence as they go. This is the collect-then-act discipline; nothing in
//! this module holds iterators across mutations.
//!
//! # Renaming
//!
//! Keys are never mutated in place. [`Registry::rename`] removes the entry,
//! then re-inserts it under the new key, restoring the original entry if the
//! new key is already taken. Renames must not run while a traversal of the
//! same registry is in progress; snapshot traversal keeps that invariant
//! visible at the call site.

use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::{CoreError, CoreResult};

/// An ordered map with unique keys and snapshot-stable traversal.
#[derive(Debug, Clone)]
pub struct Registry<K, V> {
    entries: BTreeMap<K, V>,
}

// Not derived: the derive would demand `K: Default, V: Default`, which
// the stored record types do not (and should not) implement.
impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone + Display, V> Registry<K, V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Inserts a value under `key`.
    ///
    /// # Errors
    ///
    /// `CoreError::DuplicateKey` if the key is already present; the registry
    /// is left unchanged.
    pub fn insert(&mut self, key: K, value: V) -> CoreResult<()> {
        if self.entries.contains_key(&key) {
            return Err(CoreError::duplicate(&key));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Looks up a value by key.
    pub fn find(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Looks up a value mutably by key.
    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Removes and returns the value under `key`, if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// In-order iteration over entries.
    ///
    /// Must not be held across any mutation of this registry; use
    /// [`Registry::keys_snapshot`] when the loop body may remove entries.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// In-order iteration over values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    /// Mutable in-order iteration over values.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }

    /// Returns the keys in order, as an owned snapshot.
    ///
    /// The traversal for bulk destructive operations: the snapshot stays
    /// valid while the loop body removes (or renames) entries, and callers
    /// re-check presence with [`Registry::find`] before acting on each key.
    pub fn keys_snapshot(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    /// Returns the smallest key, if any.
    pub fn first_key(&self) -> Option<K> {
        self.entries.keys().next().cloned()
    }

    /// Moves the entry at `old` to `new`.
    ///
    /// Implemented as remove-then-reinsert so the map's ordering invariants
    /// are never violated by a key mutating in place.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` if `old` is absent.
    /// - `CoreError::DuplicateKey` if `new` is taken; the entry is restored
    ///   under `old`.
    pub fn rename(&mut self, old: &K, new: K) -> CoreResult<()> {
        if old == &new {
            return Ok(());
        }
        let value = self
            .entries
            .remove(old)
            .ok_or_else(|| CoreError::not_found(old))?;
        if self.entries.contains_key(&new) {
            self.entries.insert(old.clone(), value);
            return Err(CoreError::duplicate(&new));
        }
        self.entries.insert(new, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_needs_no_default_value_type() {
        // Record types stored in registries have no Default of their own.
        struct Record(#[allow(dead_code)] u32);

        let reg: Registry<u64, Record> = Registry::default();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_insert_and_find() {
        let mut reg: Registry<String, u32> = Registry::new();
        reg.insert("b".into(), 2).unwrap();
        reg.insert("a".into(), 1).unwrap();

        assert_eq!(reg.find(&"a".to_string()), Some(&1));
        assert_eq!(reg.find(&"c".to_string()), None);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut reg: Registry<String, u32> = Registry::new();
        reg.insert("a".into(), 1).unwrap();

        let err = reg.insert("a".into(), 2).unwrap_err();
        assert_eq!(err, CoreError::duplicate("a"));
        // Original value untouched.
        assert_eq!(reg.find(&"a".to_string()), Some(&1));
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let mut reg: Registry<String, u32> = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            reg.insert(name.into(), 0).unwrap();
        }
        let keys: Vec<_> = reg.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_snapshot_tolerates_removal_during_traversal() {
        let mut reg: Registry<u64, u64> = Registry::new();
        for i in 0..10 {
            reg.insert(i, i * 10).unwrap();
        }

        // Remove every entry, including the "current" one, while walking
        // the snapshot. Every key must be visited exactly once.
        let mut visited = 0;
        for key in reg.keys_snapshot() {
            if reg.find(&key).is_some() {
                visited += 1;
                reg.remove(&key);
                // Removing a later element as a side effect is fine too.
                reg.remove(&(key + 1));
            }
        }
        assert!(reg.is_empty());
        assert_eq!(visited, 5);
    }

    #[test]
    fn test_rename_moves_entry() {
        let mut reg: Registry<String, u32> = Registry::new();
        reg.insert("old".into(), 7).unwrap();

        reg.rename(&"old".to_string(), "new".to_string()).unwrap();
        assert_eq!(reg.find(&"old".to_string()), None);
        assert_eq!(reg.find(&"new".to_string()), Some(&7));
    }

    #[test]
    fn test_rename_to_taken_key_restores_entry() {
        let mut reg: Registry<String, u32> = Registry::new();
        reg.insert("a".into(), 1).unwrap();
        reg.insert("b".into(), 2).unwrap();

        let err = reg.rename(&"a".to_string(), "b".to_string()).unwrap_err();
        assert_eq!(err, CoreError::duplicate("b"));
        assert_eq!(reg.find(&"a".to_string()), Some(&1));
        assert_eq!(reg.find(&"b".to_string()), Some(&2));
    }

    #[test]
    fn test_rename_to_same_key_is_noop() {
        let mut reg: Registry<String, u32> = Registry::new();
        reg.insert("a".into(), 1).unwrap();
        reg.rename(&"a".to_string(), "a".to_string()).unwrap();
        assert_eq!(reg.find(&"a".to_string()), Some(&1));
    }

    #[test]
    fn test_rename_missing_key() {
        let mut reg: Registry<String, u32> = Registry::new();
        let err = reg.rename(&"x".to_string(), "y".to_string()).unwrap_err();
        assert_eq!(err, CoreError::not_found("x"));
    }

    #[test]
    fn test_first_key() {
        let mut reg: Registry<String, u32> = Registry::new();
        assert_eq!(reg.first_key(), None);
        reg.insert("m".into(), 0).unwrap();
        reg.insert("a".into(), 0).unwrap();
        assert_eq!(reg.first_key(), Some("a".to_string()));
    }
}
