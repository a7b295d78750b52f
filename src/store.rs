//! Shared Counter Store
//!
//! Both limiters keep their state behind the [`CounterStore`] trait so that
//! rate and concurrency ceilings hold across every server process sharing the
//! same backing store (Redis or equivalent). The trait is the minimal atomic
//! surface the limiters need: expiring counters for daily quotas, and a hash
//! registry with a conditional insert for the active-ticket set.
//!
//! [`MemoryCounterStore`] is a process-local implementation with identical
//! semantics, used by tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Counter store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store rejected or failed the operation
    #[error("store backend error: {0}")]
    Backend(String),

    /// The key exists but holds a value of a different shape
    #[error("wrong value type for key {0}")]
    WrongType(String),
}

/// Atomic counter and hash-registry operations shared by both limiters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it with `ttl` when absent.
    ///
    /// The expiry is set only on creation; later increments within the
    /// window leave it untouched. Returns the post-increment value.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Current counter value, `None` when the key is absent or expired
    async fn counter(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Insert or overwrite a hash field
    async fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically insert `field` only while the hash holds fewer than `max`
    /// fields. Returns `false`, without inserting, when the hash is full.
    async fn hash_put_if_below(
        &self,
        key: &str,
        field: &str,
        value: &str,
        max: u64,
    ) -> Result<bool, StoreError>;

    /// Remove a hash field, reporting whether it existed
    async fn hash_remove(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Number of fields in a hash (0 when absent)
    async fn hash_len(&self, key: &str) -> Result<u64, StoreError>;

    /// All `(field, value)` pairs of a hash
    async fn hash_entries(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;
}

/// One stored value
#[derive(Debug)]
enum Slot {
    /// Expiring counter
    Counter {
        value: u64,
        expires_at: Option<Instant>,
    },
    /// Field registry
    Hash(HashMap<String, String>),
}

impl Slot {
    fn is_expired(&self) -> bool {
        match self {
            Slot::Counter {
                expires_at: Some(at),
                ..
            } => *at <= Instant::now(),
            _ => false,
        }
    }
}

/// In-memory counter store
///
/// Single-process stand-in for the shared store. Every operation takes the
/// map lock once, so check-and-insert stays atomic within the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl MemoryCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (counts expired counters until they are touched)
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Whether the store holds no keys
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(key.to_string()).or_insert(Slot::Counter {
            value: 0,
            expires_at: None,
        });
        if slot.is_expired() {
            *slot = Slot::Counter {
                value: 0,
                expires_at: None,
            };
        }
        match slot {
            Slot::Counter { value, expires_at } => {
                if *value == 0 {
                    *expires_at = Some(Instant::now() + ttl);
                }
                *value += 1;
                Ok(*value)
            }
            Slot::Hash(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn counter(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            None => Ok(None),
            Some(slot) if slot.is_expired() => Ok(None),
            Some(Slot::Counter { value, .. }) => Ok(Some(*value)),
            Some(Slot::Hash(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Hash(HashMap::new()));
        match slot {
            Slot::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Slot::Counter { .. } => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_put_if_below(
        &self,
        key: &str,
        field: &str,
        value: &str,
        max: u64,
    ) -> Result<bool, StoreError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Hash(HashMap::new()));
        match slot {
            Slot::Hash(fields) => {
                if !fields.contains_key(field) && fields.len() as u64 >= max {
                    return Ok(false);
                }
                fields.insert(field.to_string(), value.to_string());
                Ok(true)
            }
            Slot::Counter { .. } => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_remove(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut slots = self.slots.write().await;
        match slots.get_mut(key) {
            None => Ok(false),
            Some(Slot::Hash(fields)) => Ok(fields.remove(field).is_some()),
            Some(Slot::Counter { .. }) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_len(&self, key: &str) -> Result<u64, StoreError> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            None => Ok(0),
            Some(Slot::Hash(fields)) => Ok(fields.len() as u64),
            Some(Slot::Counter { .. }) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_entries(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            None => Ok(Vec::new()),
            Some(Slot::Hash(fields)) => Ok(fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            Some(Slot::Counter { .. }) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}
