//! Request-Side Model
//!
//! The application, user and per-request context the dispatch layer works
//! with. Persistence of these records belongs to the embedding service;
//! only what admission and dispatch need is carried here.

use crate::dispatch::mode::{GenerationMode, InvocationSource};
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};

/// A configured application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    /// Application id
    pub id: String,

    /// Owning tenant, the scope of the daily quota
    pub tenant_id: String,

    /// Display name
    pub name: String,

    /// Declared generation mode
    pub mode: GenerationMode,

    /// App-level cap on simultaneously active requests. 0 = unlimited
    pub max_active_requests: u32,
}

impl App {
    /// Create an app with no per-app concurrency override
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        mode: GenerationMode,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tenant_id: tenant_id.into(),
            mode,
            max_active_requests: 0,
        }
    }

    /// Set the per-app concurrency ceiling
    pub fn with_max_active_requests(mut self, max: u32) -> Self {
        self.max_active_requests = max;
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Who issued the request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RequestUser {
    /// Operator account (studio, debugger)
    Account {
        /// Account id
        id: String,
    },
    /// End user of a published app
    EndUser {
        /// End-user id
        id: String,
    },
}

impl RequestUser {
    /// The user's id, whichever kind it is
    pub fn id(&self) -> &str {
        match self {
            RequestUser::Account { id } | RequestUser::EndUser { id } => id,
        }
    }

    /// Whether this is an end user rather than an operator
    pub fn is_end_user(&self) -> bool {
        matches!(self, RequestUser::EndUser { .. })
    }
}

/// Debugger-scoped re-run target inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeTarget {
    /// Node to re-run
    pub node_id: String,

    /// What around the node is replayed
    pub scope: NodeScope,
}

/// Replay scope for a node re-run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodeScope {
    /// One iteration of the node
    Iteration,
    /// The node's surrounding loop
    Loop,
}

/// Everything a strategy needs to run one request
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// Target application
    pub app: App,

    /// Requesting user
    pub user: RequestUser,

    /// Mode-specific invocation arguments
    pub args: serde_json::Value,

    /// Where the request came from
    pub invocation_source: InvocationSource,

    /// Whether the caller will consume a stream
    pub streaming: bool,

    /// Resolved workflow definition, for modes that require one
    pub workflow: Option<Workflow>,

    /// Node re-run target, for debugger single-step entry points
    pub node_target: Option<NodeTarget>,
}

impl GenerationContext {
    /// Context for a regular generation request
    pub fn new(
        app: App,
        user: RequestUser,
        args: serde_json::Value,
        invocation_source: InvocationSource,
        streaming: bool,
    ) -> Self {
        Self {
            app,
            user,
            args,
            invocation_source,
            streaming,
            workflow: None,
            node_target: None,
        }
    }
}
