//! System-wide Tenant Rate Limiter
//!
//! Enforces a per-tenant ceiling on requests within a fixed window (a day by
//! default). The counter lives in the shared store so the ceiling holds
//! across every server process.
//!
//! This is a soft quota: check and increment are two separate calls made by
//! the service, so a narrow race under high concurrency for the same tenant
//! can over-admit by a small margin. Store failures are logged and treated
//! as "not limited" rather than rejecting traffic.

use crate::metrics;
use crate::store::CounterStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-tenant fixed-window request limiter
#[derive(Clone)]
pub struct SystemRateLimiter {
    /// Key prefix in the shared store
    prefix: String,

    /// Requests allowed per window. 0 = unlimited
    limit: u64,

    /// Window length; the counter expires this long after its first increment
    window: Duration,

    /// Shared counter store
    store: Arc<dyn CounterStore>,
}

impl SystemRateLimiter {
    /// Create a limiter with the given daily ceiling and window length
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, window: Duration) -> Self {
        Self {
            prefix: "rate:day".to_string(),
            limit,
            window,
            store,
        }
    }

    /// Configured per-window ceiling
    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn key(&self, tenant_id: &str) -> String {
        format!("{}:{}", self.prefix, tenant_id)
    }

    /// Whether the tenant has used up its window quota
    ///
    /// An absent or expired counter reads as zero. Never fails: a store
    /// error is logged and the tenant is given the benefit of the doubt.
    pub async fn is_rate_limited(&self, tenant_id: &str) -> bool {
        if self.limit == 0 {
            return false;
        }
        match self.store.counter(&self.key(tenant_id)).await {
            Ok(count) => {
                let count = count.unwrap_or(0);
                debug!(tenant_id, count, limit = self.limit, "daily quota check");
                count >= self.limit
            }
            Err(err) => {
                warn!(tenant_id, %err, "daily quota check failed, allowing request");
                false
            }
        }
    }

    /// Count one request against the tenant's window
    ///
    /// The first increment of a window sets the expiry; the counter resets
    /// by expiring, never explicitly.
    pub async fn increment(&self, tenant_id: &str) {
        if let Err(err) = self.store.increment(&self.key(tenant_id), self.window).await {
            warn!(tenant_id, %err, "daily quota increment failed");
        }
    }

    /// Record a quota rejection for observability
    pub(crate) fn record_rejection(&self) {
        metrics::DAILY_QUOTA_REJECTIONS_TOTAL.inc();
        metrics::ADMISSIONS_TOTAL
            .with_label_values(&[metrics::outcome::REJECTED_QUOTA])
            .inc();
    }
}
