use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle states of a task. Transitions only move forward:
/// pending -> in_progress -> completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    NeedsApproval,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::NeedsApproval => "needs_approval",
        }
    }

    /// Terminal states never change again once persisted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A unit of work routed to exactly one agent.
///
/// `metadata` carries the input parameters for the executing agent and
/// accumulates `result`/`error` keys after processing. `dependencies` is
/// persisted but not consulted by routing or execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub description: String,
    pub priority: i64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub output_path: Option<String>,
}

impl Task {
    /// Create a new pending task with a fresh unique id.
    pub fn new(
        task_type: impl Into<String>,
        description: impl Into<String>,
        metadata: Map<String, Value>,
        priority: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            description: description.into(),
            priority,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata,
            dependencies: Vec::new(),
            output_path: None,
        }
    }

    /// Move to a new status, refreshing `updated_at`.
    pub fn touch(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Serialize to the on-disk JSON document form.
    pub fn to_json(&self) -> Result<String, TaskError> {
        serde_json::to_string_pretty(self).map_err(TaskError::Malformed)
    }

    /// Reconstruct a task from its JSON document.
    ///
    /// Fails with [`TaskError::Malformed`] when the status is not a
    /// recognized value or a timestamp does not parse.
    pub fn from_json(data: &str) -> Result<Self, TaskError> {
        serde_json::from_str(data).map_err(TaskError::Malformed)
    }
}

/// Errors for task documents that fail to round-trip.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("malformed task document: {0}")]
    Malformed(#[source] serde_json::Error),
}
