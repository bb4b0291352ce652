//! COLONY Test Utilities
//!
//! Centralized test infrastructure for the COLONY workspace:
//! - Proptest generators for coordination records
//! - Fixture constructors for common scenarios
//! - A harness wiring all four services over one shared in-memory store

// Re-export the in-memory store from its source crate
pub use colony_storage::MemoryStore;

// Re-export core types for convenience
pub use colony_core::{
    AgentSession, CallerContext, ColonyError, ColonyResult, CoordConfig, EntityId, FileLock,
    HandoffDocument, SessionStatus, Task, TaskStatus, Timestamp,
};

use std::sync::Arc;
use std::time::Duration;

use colony_coord::{AgentRegistry, ChangeFeed, HandoffLog, LockManager, WorkQueue};
use colony_storage::DurableStore;
use proptest::prelude::*;

// ============================================================================
// FIXTURES
// ============================================================================

/// A caller context for a simulated agent.
pub fn ctx(agent_id: &str) -> CallerContext {
    CallerContext::new(agent_id, "coder")
}

/// A caller context for a simulated orchestrator.
pub fn orchestrator_ctx() -> CallerContext {
    CallerContext::new("orchestrator", "orchestrator")
}

/// A lock held by `owner` with a generous TTL.
pub fn held_lock(resource_key: &str, owner: &str) -> FileLock {
    FileLock::new(resource_key, owner, "coder", Duration::from_secs(600))
}

/// All four services wired over one shared store, as a transport would
/// assemble them.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub locks: Arc<LockManager>,
    pub queue: WorkQueue,
    pub registry: AgentRegistry,
    pub handoffs: HandoffLog,
    pub feed: ChangeFeed,
}

impl TestHarness {
    /// Build a harness over a fresh in-memory store.
    pub fn new() -> Self {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let feed = ChangeFeed::default();
        let shared: Arc<dyn DurableStore> = store.clone();
        let locks = Arc::new(LockManager::new(shared.clone()).with_feed(feed.clone()));
        let queue = WorkQueue::new(shared.clone()).with_feed(feed.clone());
        let registry =
            AgentRegistry::new(shared.clone(), locks.clone()).with_feed(feed.clone());
        let handoffs = HandoffLog::new(shared);
        Self {
            store,
            locks,
            queue,
            registry,
            handoffs,
            feed,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Generate a plausible resource key.
pub fn arb_resource_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("src/main.rs".to_string()),
        Just("src/lib.rs".to_string()),
        Just("docs/README.md".to_string()),
        Just("Cargo.toml".to_string()),
        "[a-z]{1,8}/[a-z]{1,8}\\.rs",
    ]
}

/// Generate an agent id.
pub fn arb_agent_id() -> impl Strategy<Value = String> {
    "[a-z]{3,10}-[0-9]{1,3}"
}

/// Generate a task type.
pub fn arb_task_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("implement".to_string()),
        Just("review".to_string()),
        Just("test".to_string()),
        Just("document".to_string()),
    ]
}

/// Generate a priority in the conventional range.
pub fn arb_priority() -> impl Strategy<Value = i32> {
    0i32..=9
}

/// Generate a task status.
pub fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Assigned),
        Just(TaskStatus::Running),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
        Just(TaskStatus::Cancelled),
    ]
}

/// Generate a session status.
pub fn arb_session_status() -> impl Strategy<Value = SessionStatus> {
    prop_oneof![
        Just(SessionStatus::Active),
        Just(SessionStatus::Idle),
        Just(SessionStatus::Disconnected),
    ]
}

/// Generate a pending task with random type and priority.
pub fn arb_pending_task() -> impl Strategy<Value = Task> {
    (arb_task_type(), arb_priority()).prop_map(|(task_type, priority)| {
        Task::new(&task_type, "generated task").with_priority(priority)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_coord::ClaimOutcome;

    #[test]
    fn test_harness_services_share_one_store() {
        let harness = TestHarness::new();
        let alice = ctx("alice");

        harness
            .locks
            .acquire(&alice, "src/main.rs", None, None, None)
            .unwrap();
        harness
            .queue
            .submit(&alice, colony_coord::TaskSubmission::new("test", "shared store"))
            .unwrap();

        let stats = harness.store.statistics().unwrap();
        assert_eq!(stats.lock_count, 1);
        assert_eq!(stats.task_count, 1);

        match harness.queue.claim(&alice, None).unwrap() {
            ClaimOutcome::Claimed(task) => assert_eq!(task.task_type, "test"),
            other => panic!("expected Claimed, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_generated_tasks_are_pending(task in arb_pending_task()) {
            prop_assert_eq!(task.status, TaskStatus::Pending);
            prop_assert!(task.priority >= 0 && task.priority <= 9);
        }
    }
}
