//! Billing and Plan Lookup
//!
//! The daily quota only applies to tenants on a constrained plan; the
//! dispatch layer asks this seam which tier a tenant is on and nothing else.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Subscription tier of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free tier, subject to the daily request quota
    Sandbox,
    /// Paid individual tier
    Professional,
    /// Paid team tier
    Team,
}

impl PlanTier {
    /// Whether the tenant's requests count against the daily quota
    pub fn is_constrained(&self) -> bool {
        matches!(self, PlanTier::Sandbox)
    }
}

/// Plan lookup seam
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Current plan tier for a tenant
    async fn get_plan(&self, tenant_id: &str) -> Result<PlanTier>;
}

/// In-memory plan table
///
/// Tenants without an entry fall back to the default tier.
#[derive(Debug, Clone)]
pub struct StaticBillingProvider {
    plans: Arc<RwLock<HashMap<String, PlanTier>>>,
    default_tier: PlanTier,
}

impl StaticBillingProvider {
    /// Create a table where unknown tenants get `default_tier`
    pub fn new(default_tier: PlanTier) -> Self {
        Self {
            plans: Arc::new(RwLock::new(HashMap::new())),
            default_tier,
        }
    }

    /// Assign a tenant's tier
    pub async fn set_plan(&self, tenant_id: impl Into<String>, tier: PlanTier) {
        let mut plans = self.plans.write().await;
        plans.insert(tenant_id.into(), tier);
    }
}

#[async_trait]
impl BillingProvider for StaticBillingProvider {
    async fn get_plan(&self, tenant_id: &str) -> Result<PlanTier> {
        let plans = self.plans.read().await;
        Ok(plans.get(tenant_id).copied().unwrap_or(self.default_tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sandbox_is_constrained() {
        assert!(PlanTier::Sandbox.is_constrained());
        assert!(!PlanTier::Professional.is_constrained());
        assert!(!PlanTier::Team.is_constrained());
    }

    #[tokio::test]
    async fn test_static_provider_defaults_and_overrides() {
        let billing = StaticBillingProvider::new(PlanTier::Sandbox);
        billing.set_plan("tenant-paid", PlanTier::Team).await;

        assert_eq!(billing.get_plan("tenant-paid").await.unwrap(), PlanTier::Team);
        assert_eq!(
            billing.get_plan("tenant-unknown").await.unwrap(),
            PlanTier::Sandbox
        );
    }
}
