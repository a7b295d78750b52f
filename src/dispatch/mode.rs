//! Generation Modes and Invocation Sources
//!
//! The dispatchable modes form a closed set bound to strategies at
//! registration time; unknown mode strings are a typed, non-retryable
//! caller error rather than a silent fallthrough.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an application generates content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    /// One-shot text completion
    Completion,
    /// Conversational chat
    Chat,
    /// Chat with autonomous tool use
    AgentChat,
    /// Chat driven by a workflow definition
    AdvancedChat,
    /// Pure workflow execution
    Workflow,
}

impl GenerationMode {
    /// All dispatchable modes
    pub const ALL: [GenerationMode; 5] = [
        GenerationMode::Completion,
        GenerationMode::Chat,
        GenerationMode::AgentChat,
        GenerationMode::AdvancedChat,
        GenerationMode::Workflow,
    ];

    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Completion => "completion",
            GenerationMode::Chat => "chat",
            GenerationMode::AgentChat => "agent-chat",
            GenerationMode::AdvancedChat => "advanced-chat",
            GenerationMode::Workflow => "workflow",
        }
    }

    /// Whether dispatch must resolve a workflow definition first
    pub fn requires_workflow(&self) -> bool {
        matches!(
            self,
            GenerationMode::AdvancedChat | GenerationMode::Workflow
        )
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GenerationMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| DispatchError::UnsupportedMode(s.to_string()))
    }
}

/// Where a request entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationSource {
    /// Published API
    ServiceApi,
    /// Hosted web application
    WebApp,
    /// Exploration console
    Explore,
    /// Studio debugger, runs against draft definitions
    Debugger,
}

impl InvocationSource {
    /// Whether this source targets draft workflow definitions
    pub fn is_debugger(&self) -> bool {
        matches!(self, InvocationSource::Debugger)
    }
}
