// Prometheus metrics for admission-control monitoring
//
// Exposed through gather_metrics() for whatever HTTP layer embeds this crate:
// - Admission outcomes (counter, by outcome)
// - Active admission tickets (gauge)
// - Daily-quota rejections (counter)
// - Upstream throttle translations (counter)
// - Tickets reclaimed by guard drop / stale sweep (counters)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref ADMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("admissions_total", "Admission decisions by outcome"),
        &["outcome"]
    ).expect("Failed to create admissions metric");

    pub static ref ACTIVE_TICKETS: IntGauge = IntGauge::new(
        "active_tickets",
        "Admission tickets currently held by in-flight requests"
    ).expect("Failed to create active tickets metric");

    // Rate limiter metrics
    pub static ref DAILY_QUOTA_REJECTIONS_TOTAL: IntCounter = IntCounter::new(
        "daily_quota_rejections_total",
        "Requests rejected by the tenant daily quota"
    ).expect("Failed to create daily quota rejections metric");

    // Streaming lifecycle metrics
    pub static ref UPSTREAM_THROTTLES_TOTAL: IntCounter = IntCounter::new(
        "upstream_throttles_total",
        "Provider throttle signals translated for callers"
    ).expect("Failed to create upstream throttles metric");

    pub static ref TICKETS_RECLAIMED_TOTAL: IntCounter = IntCounter::new(
        "tickets_reclaimed_total",
        "Tickets released by guard drop after stream abandonment"
    ).expect("Failed to create reclaimed tickets metric");

    pub static ref STALE_TICKETS_SWEPT_TOTAL: IntCounter = IntCounter::new(
        "stale_tickets_swept_total",
        "Tickets pruned because they outlived the max alive time"
    ).expect("Failed to create stale tickets metric");
}

/// Admission outcome labels
pub mod outcome {
    /// Request admitted
    pub const ADMITTED: &str = "admitted";
    /// Rejected at the concurrency ceiling
    pub const REJECTED_CONCURRENCY: &str = "rejected_concurrency";
    /// Rejected by the daily quota
    pub const REJECTED_QUOTA: &str = "rejected_quota";
}

/// Initialize metrics registry - must be called once at process startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_TICKETS.clone()))?;
    REGISTRY.register(Box::new(DAILY_QUOTA_REJECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_THROTTLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TICKETS_RECLAIMED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STALE_TICKETS_SWEPT_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
