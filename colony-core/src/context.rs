//! Explicit caller identity threaded through every coordination call.
//!
//! Agent identity is never read from process environment or any other global:
//! each operation receives a `CallerContext`, so one process can simulate any
//! number of distinct agents (which is exactly what the tests do).

use crate::{EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identity of the agent making a coordination call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CallerContext {
    /// Stable agent identity (e.g. "backend-worker-1"). Opaque to the core.
    pub agent_id: String,
    /// Kind of agent (e.g. "coder", "reviewer", "orchestrator").
    pub agent_type: String,
    /// Session this caller is operating under, when one has been registered.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub session_id: Option<EntityId>,
}

impl CallerContext {
    /// Create a context for an agent with no registered session yet.
    pub fn new(agent_id: &str, agent_type: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            session_id: None,
        }
    }

    /// Attach a registered session id.
    pub fn with_session(mut self, session_id: EntityId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Current wall-clock time as seen by this caller.
    ///
    /// Services take `now` from here rather than calling `Utc::now()` inline,
    /// keeping every time read in one place.
    pub fn now(&self) -> Timestamp {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_context_builder() {
        let session = Uuid::now_v7();
        let ctx = CallerContext::new("agent-a", "coder").with_session(session);
        assert_eq!(ctx.agent_id, "agent-a");
        assert_eq!(ctx.agent_type, "coder");
        assert_eq!(ctx.session_id, Some(session));
    }
}
