//! Shared key-value cache backends.
//!
//! The record cache treats its backend as an external shared service with no
//! locking primitive: plain string keys with a TTL, string sets for
//! membership indexes, and an atomic counter. [`CacheBackend`] captures
//! exactly that surface. [`DragonflyPool`](crate::dragonfly::DragonflyPool)
//! implements it over the Redis protocol; [`MemoryCacheBackend`] implements
//! it in process for tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::DbError;

/// Operations the record cache needs from a shared cache service.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a string key. Expired and missing keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, DbError>;

    /// Write a string key that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError>;

    /// Delete keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), DbError>;

    /// Add `member` to the set at `key` and (re)arm the set's expiry.
    async fn add_member(&self, key: &str, member: &str, ttl: Duration) -> Result<(), DbError>;

    /// Members of the set at `key`. Missing keys read as empty.
    async fn members(&self, key: &str) -> Result<Vec<String>, DbError>;

    /// Atomically increment the counter at `key` and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, DbError>;
}

/// Convert a TTL to whole milliseconds for the wire.
pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[derive(Debug, Clone)]
enum Slot {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache backend with Redis-like expiry semantics.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryCacheBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live (unexpired) keys.
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Snapshot of live keys, sorted. Useful for asserting on key layout.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn check_available(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("memory cache is offline".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
            return Ok(None);
        }
        match entries.get(key) {
            Some(Entry {
                slot: Slot::Text(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(Entry {
                slot: Slot::Set(_), ..
            }) => Err(DbError::Config(format!("key {key} holds a set, not a string"))),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_owned(),
            Entry {
                slot: Slot::Text(value.to_owned()),
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DbError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn add_member(&self, key: &str, member: &str, ttl: Duration) -> Result<(), DbError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            slot: Slot::Set(BTreeSet::new()),
            expires_at: None,
        });
        if !entry.is_live(now) {
            entry.slot = Slot::Set(BTreeSet::new());
        }
        match &mut entry.slot {
            Slot::Set(members) => {
                members.insert(member.to_owned());
            }
            Slot::Text(_) => {
                return Err(DbError::Config(format!("key {key} holds a string, not a set")));
            }
        }
        entry.expires_at = now.checked_add(ttl);
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, DbError> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.slot {
                Slot::Set(members) => Ok(members.iter().cloned().collect()),
                Slot::Text(_) => Err(DbError::Config(format!("key {key} holds a string, not a set"))),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn increment(&self, key: &str) -> Result<i64, DbError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(Entry {
                slot: Slot::Text(value),
                expires_at,
            }) if expires_at.is_none_or(|at| at > now) => value
                .parse::<i64>()
                .map_err(|e| DbError::Config(format!("key {key} is not an integer: {e}")))?,
            Some(Entry {
                slot: Slot::Set(_), ..
            }) => return Err(DbError::Config(format!("key {key} holds a set, not a string"))),
            _ => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| DbError::Config(format!("counter {key} overflowed")))?;
        entries.insert(
            key.to_owned(),
            Entry {
                slot: Slot::Text(next.to_string()),
                expires_at: None,
            },
        );
        Ok(next)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_expire_after_ttl() {
        let cache = MemoryCacheBackend::new();
        cache
            .set_with_ttl("k", "v", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sets_collect_members_and_delete_clears() {
        let cache = MemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        cache.add_member("s", "w1", ttl).await.unwrap();
        cache.add_member("s", "w2", ttl).await.unwrap();
        cache.add_member("s", "w1", ttl).await.unwrap();
        assert_eq!(cache.members("s").await.unwrap(), vec!["w1", "w2"]);

        cache.delete(&["s".to_owned()]).await.unwrap();
        assert!(cache.members("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn increment_starts_at_one() {
        let cache = MemoryCacheBackend::new();
        assert_eq!(cache.increment("epoch").await.unwrap(), 1);
        assert_eq!(cache.increment("epoch").await.unwrap(), 2);
        assert_eq!(cache.get("epoch").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn outage_fails_reads() {
        let cache = MemoryCacheBackend::new();
        cache.set_unavailable(true);
        assert!(matches!(cache.get("k").await, Err(DbError::Unavailable(_))));
    }

    #[test]
    fn ttl_never_rounds_to_zero() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
