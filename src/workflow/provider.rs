//! Workflow Definition Provider
//!
//! Advanced-chat and workflow apps run against a graph definition that must
//! be resolved before dispatch: the published version for normal invocation,
//! the draft for debugger-sourced invocation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Version marker for a draft definition
pub const DRAFT_VERSION: &str = "draft";

/// One workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Definition id
    pub id: String,

    /// Owning application
    pub app_id: String,

    /// Version label; `draft` for the editable copy
    pub version: String,

    /// Node graph
    pub graph: serde_json::Value,

    /// When this version was created
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a draft definition
    pub fn draft(app_id: impl Into<String>, graph: serde_json::Value) -> Self {
        Self::with_version(app_id, DRAFT_VERSION, graph)
    }

    /// Create a definition with an explicit version label
    pub fn with_version(
        app_id: impl Into<String>,
        version: impl Into<String>,
        graph: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("wf-{}", Uuid::new_v4()),
            app_id: app_id.into(),
            version: version.into(),
            graph,
            created_at: Utc::now(),
        }
    }

    /// Whether this is the editable draft copy
    pub fn is_draft(&self) -> bool {
        self.version == DRAFT_VERSION
    }
}

/// Source of workflow definitions
#[async_trait]
pub trait WorkflowProvider: Send + Sync {
    /// Latest published definition for an app, if any
    async fn get_published(&self, app_id: &str) -> Result<Option<Workflow>>;

    /// Draft definition for an app, if any
    async fn get_draft(&self, app_id: &str) -> Result<Option<Workflow>>;
}

/// In-memory workflow provider
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkflowProvider {
    drafts: Arc<RwLock<HashMap<String, Workflow>>>,
    published: Arc<RwLock<HashMap<String, Workflow>>>,
}

impl MemoryWorkflowProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace an app's draft definition
    pub async fn save_draft(&self, workflow: Workflow) {
        let mut drafts = self.drafts.write().await;
        drafts.insert(workflow.app_id.clone(), workflow);
    }

    /// Store or replace an app's published definition
    pub async fn publish(&self, workflow: Workflow) {
        let mut published = self.published.write().await;
        published.insert(workflow.app_id.clone(), workflow);
    }
}

#[async_trait]
impl WorkflowProvider for MemoryWorkflowProvider {
    async fn get_published(&self, app_id: &str) -> Result<Option<Workflow>> {
        Ok(self.published.read().await.get(app_id).cloned())
    }

    async fn get_draft(&self, app_id: &str) -> Result<Option<Workflow>> {
        Ok(self.drafts.read().await.get(app_id).cloned())
    }
}
