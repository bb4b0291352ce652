//! Session handoff log.
//!
//! Write a note at session end (or any checkpoint), read it back at the start
//! of the next session. The log is append-only by design: there is no update
//! and no delete, and correcting a mistaken handoff means writing a new one.

use std::sync::Arc;

use colony_core::{CallerContext, ColonyResult, HandoffDocument, ValidationError};
use colony_storage::DurableStore;
use tracing::debug;

use crate::permission::{ensure_permitted, operations, AllowAll, PermissionGate};

/// The caller-supplied parts of a handoff. The summary is required;
/// everything else is optional structured context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffDraft {
    pub summary: String,
    pub completed_work: Vec<String>,
    pub in_progress: Vec<String>,
    pub decisions: Vec<String>,
    pub next_steps: Vec<String>,
    pub relevant_files: Vec<String>,
}

impl HandoffDraft {
    /// Create a draft with the required summary.
    pub fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            ..Self::default()
        }
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

/// Append-only continuity notes over a [`DurableStore`].
pub struct HandoffLog {
    store: Arc<dyn DurableStore>,
    gate: Arc<dyn PermissionGate>,
}

impl HandoffLog {
    /// Create a log with an allow-all gate.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            gate: Arc::new(AllowAll),
        }
    }

    /// Set the authorization gate.
    pub fn with_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Append a handoff written by the calling agent.
    ///
    /// The document is keyed by `ctx.agent_id` and carries `ctx.session_id`
    /// when present. An empty summary is rejected before anything is written.
    pub fn write(&self, ctx: &CallerContext, draft: HandoffDraft) -> ColonyResult<HandoffDocument> {
        ensure_permitted(&*self.gate, operations::WRITE_HANDOFF, ctx, &ctx.agent_id)?;
        if draft.summary.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "summary".to_string(),
            }
            .into());
        }

        let mut doc = HandoffDocument::new(&ctx.agent_id, &draft.summary)
            .with_completed_work(draft.completed_work)
            .with_in_progress(draft.in_progress)
            .with_decisions(draft.decisions)
            .with_next_steps(draft.next_steps)
            .with_relevant_files(draft.relevant_files);
        if let Some(session_id) = ctx.session_id {
            doc = doc.with_session(session_id);
        }

        self.store.handoff_append(&doc)?;
        debug!(agent = %doc.agent_name, handoff_id = %doc.handoff_id, "handoff written");
        Ok(doc)
    }

    /// Read the `limit` most recent handoffs, newest first, optionally
    /// filtered by agent name. An empty list is a normal result.
    pub fn read(
        &self,
        agent_name: Option<&str>,
        limit: usize,
    ) -> ColonyResult<Vec<HandoffDocument>> {
        self.store.handoff_list_recent(agent_name, limit)
    }
}
