//! Per-tenant send rate enforcement.
//!
//! Buckets live in the cache as atomic counters keyed by tenant and epoch
//! second, so every node of a deployment shares the same view. A tenant
//! over its cap gets `QuotaExceeded` (HTTP 429) rather than queue space.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, UNIX_EPOCH},
};

use courier_core::{Cache, Clock, CoreError, Result, TenantId};

/// Cache-backed fixed-window rate limiter.
#[derive(Debug)]
pub struct TenantRateLimiter {
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    default_per_sec: u32,
    overrides: RwLock<HashMap<TenantId, u32>>,
}

impl TenantRateLimiter {
    /// Creates a limiter allowing `default_per_sec` admissions per tenant
    /// per second.
    pub fn new(cache: Arc<dyn Cache>, clock: Arc<dyn Clock>, default_per_sec: u32) -> Self {
        Self { cache, clock, default_per_sec, overrides: RwLock::new(HashMap::new()) }
    }

    /// Sets a tenant-specific cap.
    pub fn set_limit(&self, tenant_id: TenantId, per_sec: u32) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        overrides.insert(tenant_id, per_sec);
    }

    fn limit_for(&self, tenant_id: TenantId) -> u32 {
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        overrides.get(&tenant_id).copied().unwrap_or(self.default_per_sec)
    }

    /// Consumes one admission slot for the tenant.
    ///
    /// # Errors
    ///
    /// [`CoreError::QuotaExceeded`] when the tenant's window is full.
    pub async fn acquire(&self, tenant_id: TenantId) -> Result<()> {
        let limit = self.limit_for(tenant_id);
        if limit == 0 {
            return Err(CoreError::QuotaExceeded);
        }

        let epoch_sec = self
            .clock
            .now_system()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let key = format!("ratelimit:{tenant_id}:{epoch_sec}");

        let count = self.cache.incr_by(&key, 1).await?;
        self.cache.expire(&key, Duration::from_secs(2)).await?;

        if count > i64::from(limit) {
            return Err(CoreError::QuotaExceeded);
        }
        Ok(())
    }
}
