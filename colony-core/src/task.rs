//! Work queue tasks.
//!
//! A `Task` is one unit of work. It is claimable only while `Pending` with
//! every dependency `Completed`; the atomic claim transition lives in the
//! storage layer, the pure state model lives here.
//!
//! # State Transition Diagram
//!
//! ```text
//! submit() → Pending ── claim() ──→ Assigned ──→ Running ──┬──→ Completed
//!                                       │                  ├──→ Failed
//!                                       └──────────────────┴──→ Cancelled
//! ```

use crate::{EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// TASK STATUS ENUM
// ============================================================================

/// Status of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum TaskStatus {
    /// Waiting in the queue, not yet assigned
    Pending,
    /// Claimed by an agent, work not yet reported started
    Assigned,
    /// The assigned agent reported it is working
    Running,
    /// Finished successfully (terminal)
    Completed,
    /// Finished unsuccessfully (terminal)
    Failed,
    /// Terminated by the orchestrator (terminal)
    Cancelled,
}

impl TaskStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TaskStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "assigned" => Ok(TaskStatus::Assigned),
            "running" => Ok(TaskStatus::Running),
            "completed" | "complete" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(TaskStatusParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid task status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid task status: {}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ============================================================================
// TASK
// ============================================================================

/// A unit of work in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Task {
    /// Unique identifier for this task
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub task_id: EntityId,
    /// Kind of work (e.g. "implement", "review", "test")
    pub task_type: String,
    /// Human-readable description of the work
    pub description: String,
    /// Structured input handed to the claiming agent
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub input_payload: Option<serde_json::Value>,
    /// Urgency; lower values are claimed first
    pub priority: i32,
    /// Tasks that must be `Completed` before this one is claimable
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub depends_on: Vec<EntityId>,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Agent the task is assigned to, if claimed
    pub assigned_to: Option<String>,
    /// When the task was claimed
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub assigned_at: Option<Timestamp>,
    /// Number of times this logical unit of work has been claimed
    pub attempt_count: i32,
    /// Claim budget; callers stop resubmitting once reached
    pub max_attempts: i32,
    /// Structured result reported on completion
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub result_payload: Option<serde_json::Value>,
    /// Failure detail reported on failure or cancellation
    pub error_message: Option<String>,
    /// When the task was submitted
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    /// Advisory deadline; never enforced by the core
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub deadline: Option<Timestamp>,
}

impl Task {
    /// Default priority for submissions that do not specify one.
    pub const DEFAULT_PRIORITY: i32 = 5;
    /// Default claim budget.
    pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

    /// Create a new pending task.
    pub fn new(task_type: &str, description: &str) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            task_type: task_type.to_string(),
            description: description.to_string(),
            input_payload: None,
            priority: Self::DEFAULT_PRIORITY,
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            assigned_to: None,
            assigned_at: None,
            attempt_count: 0,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            result_payload: None,
            error_message: None,
            created_at: Utc::now(),
            deadline: None,
        }
    }

    /// Set the structured input payload.
    pub fn with_input(mut self, payload: serde_json::Value) -> Self {
        self.input_payload = Some(payload);
        self
    }

    /// Set the priority (lower = more urgent).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependency set.
    pub fn with_dependencies(mut self, depends_on: Vec<EntityId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Set the claim budget.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set an advisory deadline.
    pub fn with_deadline(mut self, deadline: Timestamp) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Check whether this task's type is admitted by a claim filter.
    /// An empty/absent filter admits every type.
    pub fn matches_types(&self, allowed: Option<&[String]>) -> bool {
        match allowed {
            None => true,
            Some(types) if types.is_empty() => true,
            Some(types) => types.iter().any(|t| t == &self.task_type),
        }
    }

    /// Check if the advisory deadline has passed.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }

    /// Check if another claim attempt is within budget.
    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Build a fresh pending row for retrying this logical unit of work.
    ///
    /// The queue never resubmits on its own; callers decide whether to submit
    /// the row this returns. The old row keeps its terminal state for audit.
    /// `attempt_count` carries forward and increments again on claim, so the
    /// count on a claimed retry reads as total claims across the logical unit.
    pub fn next_attempt(&self) -> Task {
        Task {
            task_id: Uuid::now_v7(),
            task_type: self.task_type.clone(),
            description: self.description.clone(),
            input_payload: self.input_payload.clone(),
            priority: self.priority,
            depends_on: self.depends_on.clone(),
            status: TaskStatus::Pending,
            assigned_to: None,
            assigned_at: None,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            result_payload: None,
            error_message: None,
            created_at: Utc::now(),
            deadline: self.deadline,
        }
    }
}
