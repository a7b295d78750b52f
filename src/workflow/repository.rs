//! Workflow Node-Execution Persistence
//!
//! Repository seam for the execution records a workflow run produces, with
//! configurable multi-field ordering on retrieval. Consumers of the dispatch
//! layer use it for history, never for admission decisions.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of one node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    /// Still executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
}

/// Record of one node execution inside a workflow run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeExecution {
    /// Record id
    pub id: String,

    /// Workflow run this execution belongs to
    pub workflow_run_id: String,

    /// Executed node
    pub node_id: String,

    /// Position of the node within the run
    pub index: u32,

    /// Execution outcome
    pub status: NodeExecutionStatus,

    /// Node inputs
    pub inputs: serde_json::Value,

    /// Node outputs
    pub outputs: serde_json::Value,

    /// Error message when the node failed
    pub error: Option<String>,

    /// When the execution started
    pub created_at: DateTime<Utc>,
}

impl NodeExecution {
    /// Create a running execution record
    pub fn new(
        workflow_run_id: impl Into<String>,
        node_id: impl Into<String>,
        index: u32,
    ) -> Self {
        Self {
            id: format!("exec-{}", Uuid::new_v4()),
            workflow_run_id: workflow_run_id.into(),
            node_id: node_id.into(),
            index,
            status: NodeExecutionStatus::Running,
            inputs: serde_json::Value::Null,
            outputs: serde_json::Value::Null,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Sort direction for execution retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

/// Ordering configuration for execution retrieval
///
/// Fields are compared in sequence; supported names are `index`,
/// `created_at`, `node_id` and `id`. Unknown names compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConfig {
    /// Field names compared in sequence
    pub order_by: Vec<String>,

    /// Sort direction applied to the whole sequence
    pub direction: OrderDirection,
}

impl OrderConfig {
    /// Ascending order over the given fields
    pub fn asc(order_by: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            order_by: order_by.into_iter().map(Into::into).collect(),
            direction: OrderDirection::Asc,
        }
    }

    /// Descending order over the given fields
    pub fn desc(order_by: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            order_by: order_by.into_iter().map(Into::into).collect(),
            direction: OrderDirection::Desc,
        }
    }

    fn compare(&self, a: &NodeExecution, b: &NodeExecution) -> CmpOrdering {
        let mut ordering = CmpOrdering::Equal;
        for field in &self.order_by {
            ordering = match field.as_str() {
                "index" => a.index.cmp(&b.index),
                "created_at" => a.created_at.cmp(&b.created_at),
                "node_id" => a.node_id.cmp(&b.node_id),
                "id" => a.id.cmp(&b.id),
                _ => CmpOrdering::Equal,
            };
            if ordering != CmpOrdering::Equal {
                break;
            }
        }
        match self.direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        }
    }
}

/// Persistence seam for node executions
#[async_trait]
pub trait NodeExecutionRepository: Send + Sync {
    /// Save or update an execution record, keyed by its id
    async fn save(&self, execution: NodeExecution) -> Result<()>;

    /// All executions of a workflow run, optionally ordered
    async fn get_by_run(
        &self,
        workflow_run_id: &str,
        order: Option<OrderConfig>,
    ) -> Result<Vec<NodeExecution>>;
}

/// In-memory node-execution repository
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeExecutionRepository {
    records: Arc<RwLock<HashMap<String, NodeExecution>>>,
}

impl MemoryNodeExecutionRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the repository holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl NodeExecutionRepository for MemoryNodeExecutionRepository {
    async fn save(&self, execution: NodeExecution) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn get_by_run(
        &self,
        workflow_run_id: &str,
        order: Option<OrderConfig>,
    ) -> Result<Vec<NodeExecution>> {
        let records = self.records.read().await;
        let mut executions: Vec<NodeExecution> = records
            .values()
            .filter(|e| e.workflow_run_id == workflow_run_id)
            .cloned()
            .collect();
        if let Some(order) = order {
            executions.sort_by(|a, b| order.compare(a, b));
        }
        Ok(executions)
    }
}
