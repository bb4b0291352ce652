//! Agent liveness and identity records.
//!
//! An `AgentSession` is one running agent instance. Sessions are append-only
//! history: they are never deleted, only flipped to `Disconnected` by the
//! dead-agent sweep when their heartbeat goes stale.

use crate::{EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// SESSION STATUS ENUM
// ============================================================================

/// Liveness status of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SessionStatus {
    /// Heartbeating and working
    Active,
    /// Heartbeating, waiting for work
    Idle,
    /// Declared dead by the sweep; holds no locks
    Disconnected,
}

impl SessionStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Disconnected => "disconnected",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SessionStatusParseError> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "disconnected" => Ok(SessionStatus::Disconnected),
            _ => Err(SessionStatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SessionStatus {
    type Err = SessionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid session status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusParseError(pub String);

impl fmt::Display for SessionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid session status: {}", self.0)
    }
}

impl std::error::Error for SessionStatusParseError {}

// ============================================================================
// AGENT SESSION
// ============================================================================

/// Liveness and identity record for one running agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentSession {
    /// Unique identifier for this session
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub session_id: EntityId,
    /// Stable agent identity across sessions
    pub agent_id: String,
    /// Kind of agent (e.g. "coder", "reviewer")
    pub agent_type: String,
    /// Capabilities this agent advertises
    pub capabilities: Vec<String>,
    /// Current liveness status
    pub status: SessionStatus,
    /// Task currently being worked on, if any
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub current_task: Option<EntityId>,
    /// Last heartbeat timestamp; staleness is judged against this
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_heartbeat: Timestamp,
    /// When the session started
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub started_at: Timestamp,
    /// When the session ended; set only by the sweep
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub ended_at: Option<Timestamp>,
}

impl AgentSession {
    /// Create a new active session.
    pub fn new(agent_id: &str, agent_type: &str, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::now_v7(),
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            capabilities,
            status: SessionStatus::Active,
            current_task: None,
            last_heartbeat: now,
            started_at: now,
            ended_at: None,
        }
    }

    /// Use a caller-supplied session id instead of a minted one.
    pub fn with_session_id(mut self, session_id: EntityId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the task currently being worked on.
    pub fn with_current_task(mut self, task_id: EntityId) -> Self {
        self.current_task = Some(task_id);
        self
    }

    /// Record a heartbeat at `now`.
    pub fn heartbeat(&mut self, now: Timestamp) {
        self.last_heartbeat = now;
    }

    /// Check if this agent advertises a specific capability.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Check whether the heartbeat is older than `threshold` at `now`.
    pub fn is_stale(&self, threshold: Duration, now: Timestamp) -> bool {
        let age = now - self.last_heartbeat;
        match chrono::Duration::from_std(threshold) {
            Ok(t) => age > t,
            Err(_) => false,
        }
    }

    /// Mark the session dead. Only the sweep calls this.
    pub fn disconnect(&mut self, now: Timestamp) {
        self.status = SessionStatus::Disconnected;
        self.ended_at = Some(now);
    }
}
