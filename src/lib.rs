//! Floodgate
//!
//! Admission control and streaming dispatch for multi-tenant generation
//! backends. Requests pass a per-tenant daily quota and a per-application
//! concurrency governor before reaching a pluggable generation strategy;
//! the admission slot is tied to the full lifetime of the response, streamed
//! or not, and is released exactly once however the request ends.

pub mod billing;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod store;
pub mod workflow;

pub use billing::{BillingProvider, PlanTier, StaticBillingProvider};
pub use config::{AdmissionConfig, Config, LoggingConfig};
pub use dispatch::{
    App, EventStream, GenerateService, GenerationContext, GenerationEvent, GenerationMode,
    GenerationOutput, GenerationStrategy, InvocationSource, NodeScope, NodeTarget, RequestUser,
    StrategyRegistry,
};
pub use error::{DispatchError, ProviderError};
pub use rate_limit::{
    effective_max_active, AdmissionGuard, ConcurrencyGovernor, DispatchResponse,
    GuardedEventStream, SystemRateLimiter,
};
pub use store::{CounterStore, MemoryCounterStore, StoreError};
pub use workflow::{
    MemoryNodeExecutionRepository, MemoryWorkflowProvider, NodeExecution,
    NodeExecutionRepository, NodeExecutionStatus, OrderConfig, OrderDirection, Workflow,
    WorkflowProvider,
};
