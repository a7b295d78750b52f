//! Dispatch Error Types
//!
//! This module defines all error kinds a generation request can fail with,
//! from admission rejections through strategy failures.

use crate::store::StoreError;

/// Error kinds surfaced to callers of the dispatch layer
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Tenant exhausted its daily request quota
    #[error(
        "Rate limit exceeded, please upgrade your plan or your RPD was {limit} requests/day (tenant {tenant_id})"
    )]
    RateLimitExceeded {
        /// Tenant that hit the quota
        tenant_id: String,
        /// Configured daily ceiling
        limit: u64,
    },

    /// Application is at its concurrency ceiling
    #[error("Too many active requests for app {app_id} (max {limit}), please try again later")]
    ConcurrencyLimitExceeded {
        /// Application at capacity
        app_id: String,
        /// Effective concurrency ceiling
        limit: u32,
    },

    /// The underlying model provider throttled the request
    #[error("Upstream rate limit exceeded: {0}")]
    UpstreamRateLimited(String),

    /// Declared mode has no registered strategy
    #[error("Invalid app mode: {0}")]
    UnsupportedMode(String),

    /// No draft workflow exists for a debugger-sourced invocation
    #[error("Workflow not initialized for app {app_id}")]
    WorkflowNotFound {
        /// Application missing the draft definition
        app_id: String,
    },

    /// No published workflow exists for a normal invocation
    #[error("Workflow not published for app {app_id}")]
    WorkflowNotPublished {
        /// Application missing the published definition
        app_id: String,
    },

    /// Counter store failure during admission
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// Unexpected strategy failure, passed through unchanged
    #[error(transparent)]
    Strategy(#[from] anyhow::Error),
}

impl DispatchError {
    /// Whether a caller may reasonably retry the request later
    ///
    /// Admission and upstream throttling clear on their own; everything else
    /// is a caller or configuration error that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::ConcurrencyLimitExceeded { .. } | DispatchError::UpstreamRateLimited(_)
        )
    }
}

/// Error surfaced by a generation strategy's underlying model provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider throttled the request
    #[error("Provider throttled the request: {0}")]
    Throttled(String),

    /// Any other failure inside the strategy
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ProviderError> for DispatchError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Throttled(message) => DispatchError::UpstreamRateLimited(message),
            ProviderError::Other(err) => DispatchError::Strategy(err),
        }
    }
}
