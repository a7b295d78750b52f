//! Rate Limiting and Admission Control Module
//!
//! This module provides the two admission gates every generation request
//! passes through, plus the wrapper that ties a granted slot to the full
//! lifetime of a streamed response.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Request                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SystemRateLimiter      per-tenant daily quota (soft)        │
//! │  ConcurrencyGovernor    per-app active-ticket ceiling        │
//! │  GuardedEventStream     exactly-once slot release across     │
//! │                         completion / error / abandonment     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  CounterStore           shared across server processes       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Admission is accept-or-reject: a request over a ceiling is rejected
//! immediately, never queued. Backpressure belongs to the caller.

pub mod governor;
pub mod stream;
pub mod system;

pub use governor::{effective_max_active, AdmissionGuard, ConcurrencyGovernor};
pub use stream::{DispatchResponse, GuardedEventStream};
pub use system::SystemRateLimiter;
