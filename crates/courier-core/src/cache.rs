//! Key/value cache collaborator.
//!
//! The gateway does not own durable storage; transient state (inflight
//! records, token buckets, analytics counters) lives in an external cache
//! consumed through this trait. The in-memory implementation backs tests
//! and single-node deployments.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    error::{CoreError, Result},
    time::Clock,
};

/// Minimal cache surface the gateway depends on.
///
/// `compare_and_swap` is the only primitive with cross-key ordering
/// requirements: the inflight store builds its monotone status updates on
/// it, so implementations must make it atomic per key.
#[async_trait::async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Reads a value, honouring TTL expiry.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes a value with an optional TTL.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Atomically replaces `key` only if its current value equals
    /// `expected` (`None` = key absent). Returns whether the swap applied.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Atomically increments an integer counter, creating it at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Atomically adds to a float accumulator, creating it at zero.
    async fn incr_by_float(&self, key: &str, delta: f64) -> Result<f64>;

    /// Sets or refreshes the TTL of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Removes a key.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<std::time::Instant>,
}

/// In-memory cache with lazy TTL expiry.
///
/// TTLs are evaluated against the injected [`Clock`], so tests can advance
/// time to expire entries deterministically.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Creates an empty cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    fn live_value(&self, entry: &Entry) -> Option<Value> {
        match entry.expires_at {
            Some(deadline) if self.clock.now() >= deadline => None,
            _ => Some(entry.value.clone()),
        }
    }

    fn deadline(&self, ttl: Option<Duration>) -> Option<std::time::Instant> {
        ttl.map(|t| self.clock.now() + t)
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) => match self.live_value(entry) {
                Some(value) => Ok(Some(value)),
                None => {
                    entries.remove(key);
                    Ok(None)
                },
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), Entry { value, expires_at: self.deadline(ttl) });
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).and_then(|e| self.live_value(e));

        if current.as_ref() != expected {
            return Ok(false);
        }

        entries.insert(key.to_string(), Entry { value: new, expires_at: self.deadline(ttl) });
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .and_then(|e| self.live_value(e))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let next = current + delta;
        let expires_at = entries.get(key).and_then(|e| e.expires_at);
        entries.insert(key.to_string(), Entry { value: Value::from(next), expires_at });
        Ok(next)
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> Result<f64> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .and_then(|e| self.live_value(e))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let next = current + delta;
        let expires_at = entries.get(key).and_then(|e| e.expires_at);
        let value = serde_json::Number::from_f64(next)
            .map(Value::Number)
            .ok_or_else(|| CoreError::Internal(format!("non-finite counter value for {key}")))?;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(self.clock.now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
