//! Mode Dispatch Module
//!
//! Maps each request's declared mode to its generation strategy and exposes
//! the admission-controlled service entry points.

pub mod mode;
pub mod output;
pub mod registry;
pub mod request;
pub mod service;

pub use mode::{GenerationMode, InvocationSource};
pub use output::{EventStream, GenerationEvent, GenerationOutput};
pub use registry::{GenerationStrategy, StrategyRegistry};
pub use request::{App, GenerationContext, NodeScope, NodeTarget, RequestUser};
pub use service::GenerateService;
