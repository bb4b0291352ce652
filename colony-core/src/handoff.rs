//! Session handoff documents.
//!
//! A `HandoffDocument` is a durable note written by an agent for the benefit
//! of a future session. Handoffs form an append-only log: "most recent" is
//! derived by ordering on `created_at`, never by mutation, and correcting a
//! mistaken handoff is done by writing a new one.

use crate::{EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable context-continuity note keyed by agent identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HandoffDocument {
    /// Unique identifier for this document
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub handoff_id: EntityId,
    /// Agent identity the note is keyed by
    pub agent_name: String,
    /// Session the note was written under
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub session_id: Option<EntityId>,
    /// What the session was about; the only required field
    pub summary: String,
    /// Work finished during the session
    pub completed_work: Vec<String>,
    /// Work started but not finished
    pub in_progress: Vec<String>,
    /// Decisions made, for the next session to honor
    pub decisions: Vec<String>,
    /// Suggested next steps
    pub next_steps: Vec<String>,
    /// Files the next session should look at first
    pub relevant_files: Vec<String>,
    /// When the document was written
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl HandoffDocument {
    /// Create a new handoff with the required summary.
    pub fn new(agent_name: &str, summary: &str) -> Self {
        Self {
            handoff_id: Uuid::now_v7(),
            agent_name: agent_name.to_string(),
            session_id: None,
            summary: summary.to_string(),
            completed_work: Vec::new(),
            in_progress: Vec::new(),
            decisions: Vec::new(),
            next_steps: Vec::new(),
            relevant_files: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach the writing session.
    pub fn with_session(mut self, session_id: EntityId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set the completed-work list.
    pub fn with_completed_work(mut self, items: Vec<String>) -> Self {
        self.completed_work = items;
        self
    }

    /// Set the in-progress list.
    pub fn with_in_progress(mut self, items: Vec<String>) -> Self {
        self.in_progress = items;
        self
    }

    /// Set the decisions list.
    pub fn with_decisions(mut self, items: Vec<String>) -> Self {
        self.decisions = items;
        self
    }

    /// Set the next-steps list.
    pub fn with_next_steps(mut self, items: Vec<String>) -> Self {
        self.next_steps = items;
        self
    }

    /// Set the relevant-files list.
    pub fn with_relevant_files(mut self, items: Vec<String>) -> Self {
        self.relevant_files = items;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_builder() {
        let doc = HandoffDocument::new("agent-a", "migrated the auth module")
            .with_completed_work(vec!["ported login".to_string()])
            .with_next_steps(vec!["port logout".to_string()])
            .with_relevant_files(vec!["src/auth.rs".to_string()]);
        assert_eq!(doc.agent_name, "agent-a");
        assert_eq!(doc.summary, "migrated the auth module");
        assert_eq!(doc.completed_work.len(), 1);
        assert_eq!(doc.next_steps.len(), 1);
        assert!(doc.decisions.is_empty());
    }

    #[test]
    fn test_handoff_ids_order_by_creation() {
        let a = HandoffDocument::new("agent-a", "first");
        let b = HandoffDocument::new("agent-a", "second");
        // UUIDv7 ids act as a deterministic tiebreak for same-millisecond writes.
        assert!(a.handoff_id <= b.handoff_id);
        assert!(a.created_at <= b.created_at);
    }
}
