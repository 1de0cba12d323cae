//! The keyspace: one `Database` per SELECT index, each a mapping from binary
//! key to a value with optional absolute-millisecond expiry.
//!
//! Expiration and notification policy live a level up (in the server state),
//! which funnels every key resolution through one lazy-expire choke point.
//! This module is pure data.

pub mod hll;
pub mod stream;
pub mod value;
pub mod zset;

use std::collections::HashMap;

pub use value::{Value, ValueKind};

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    /// Absolute expiry in ms since the epoch; `None` never expires.
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn with_expiry(value: Value, expires_at: Option<u64>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|t| t <= now_ms)
    }
}

/// A single numbered database.
///
/// `versions` is the WATCH bookkeeping: every successful write stamps the
/// key with the server's global version counter. The map intentionally
/// survives key deletion so a watcher of an absent key still observes
/// create-then-delete churn. `epoch` bumps on FLUSH/SWAPDB and invalidates
/// every watch on the database at once.
#[derive(Debug, Clone, Default)]
pub struct Database {
    entries: HashMap<Vec<u8>, Entry>,
    versions: HashMap<Vec<u8>, u64>,
    epoch: u64,
}

impl Database {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: Vec<u8>, entry: Entry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Entry)> {
        self.entries.iter()
    }

    /// Clear all keys and invalidate every watch on this database.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.versions.clear();
        self.epoch += 1;
        n
    }

    /// SWAPDB support: exchange contents with another database. Both epochs
    /// bump so watches on either side are invalidated.
    pub fn swap_with(&mut self, other: &mut Database) {
        std::mem::swap(&mut self.entries, &mut other.entries);
        std::mem::swap(&mut self.versions, &mut other.versions);
        self.epoch += 1;
        other.epoch += 1;
    }

    pub fn version_of(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    pub fn stamp_version(&mut self, key: &[u8], version: u64) {
        self.versions.insert(key.to_vec(), version);
    }

    /// Keys carrying a TTL, for the active-expiry sample sweep.
    pub fn volatile_keys(&self, limit: usize) -> Vec<Vec<u8>> {
        self.entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some())
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_expiry_check() {
        let e = Entry::with_expiry(Value::Str(b"v".to_vec()), Some(100));
        assert!(!e.is_expired(99));
        assert!(e.is_expired(100));
        assert!(e.is_expired(101));
        assert!(!Entry::new(Value::Str(vec![])).is_expired(u64::MAX));
    }

    #[test]
    fn clear_bumps_epoch_and_drops_versions() {
        let mut db = Database::default();
        db.insert(b"k".to_vec(), Entry::new(Value::Str(b"v".to_vec())));
        db.stamp_version(b"k", 7);
        assert_eq!(db.version_of(b"k"), 7);
        assert_eq!(db.clear(), 1);
        assert_eq!(db.version_of(b"k"), 0);
        assert_eq!(db.epoch(), 1);
    }

    #[test]
    fn versions_survive_deletion() {
        let mut db = Database::default();
        db.insert(b"k".to_vec(), Entry::new(Value::Str(b"v".to_vec())));
        db.stamp_version(b"k", 3);
        db.remove(b"k");
        assert_eq!(db.version_of(b"k"), 3);
    }
}
