//! COLONY Storage - Durable Store Trait and Backends
//!
//! Defines the storage abstraction the coordination services are layered on.
//! Every trait method is a single atomic unit: one transaction (LMDB) or one
//! lock-guarded critical section (memory). Two concurrent callers racing on
//! the same key always produce one winner and one well-defined loser - the
//! services above this layer add no synchronization of their own.
//!
//! The conditional operations here (`lock_acquire`, `task_claim_next`,
//! `session_reap_stale`) are the explicit replacements for what a row store
//! would express as stored procedures with conditional inserts and
//! `SELECT ... FOR UPDATE SKIP LOCKED`.

pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;

use colony_core::{
    AgentSession, ColonyResult, EntityId, FileLock, HandoffDocument, SessionStatus, Task,
    TaskStatus, Timestamp,
};

// ============================================================================
// CONDITIONAL-OPERATION OUTCOMES
// ============================================================================

/// Outcome of a conditional lock insert.
#[derive(Debug, Clone, PartialEq)]
pub enum LockAcquireOutcome {
    /// No live lock existed; the candidate row was inserted.
    Acquired(FileLock),
    /// A live lock owned by the same agent existed; its expiry was extended
    /// to the candidate's. The returned row keeps the original `acquired_at`.
    Refreshed(FileLock),
    /// A live lock owned by a different agent exists; nothing was written.
    Conflict(FileLock),
}

/// Outcome of an owner-checked lock delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockReleaseOutcome {
    /// The caller owned the lock and it was deleted.
    Released,
    /// A live lock exists but belongs to someone else; nothing was deleted.
    NotOwner { owner_agent_id: String },
    /// No live lock exists for the key.
    NotFound,
}

/// Outcome of an ownership-checked terminal task transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFinishOutcome {
    /// The transition was applied; the updated row is returned.
    Updated(Task),
    /// `expected_owner` did not match `assigned_to`; nothing changed.
    NotOwner { assigned_to: Option<String> },
    /// The task is already in a terminal state; nothing changed.
    AlreadyTerminal(Task),
    /// No task with that id exists.
    NotFound,
}

/// Per-collection row counts for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    pub lock_count: u64,
    pub task_count: u64,
    pub session_count: u64,
    pub handoff_count: u64,
}

// ============================================================================
// DURABLE STORE TRAIT
// ============================================================================

/// Storage trait for COLONY coordination records.
///
/// Implementations must make each method atomic against concurrent calls on
/// the same backend, and must hold no record state outside the backend itself
/// (every call re-reads what it needs).
pub trait DurableStore: Send + Sync {
    // === Lock Operations ===

    /// Conditionally insert `candidate`, treating rows expired at `now` as
    /// absent (lazy expiry: such rows are purged here, as a side effect).
    ///
    /// The purge, the conflict check, and the insert-or-extend all happen in
    /// one atomic unit, so a race between expiry cleanup and a competing
    /// acquire can never produce two winners.
    fn lock_acquire(&self, candidate: &FileLock, now: Timestamp) -> ColonyResult<LockAcquireOutcome>;

    /// Delete the lock on `resource_key` if `owner_agent_id` owns it.
    /// Fails closed: a non-owner caller deletes nothing.
    fn lock_release(
        &self,
        resource_key: &str,
        owner_agent_id: &str,
    ) -> ColonyResult<LockReleaseOutcome>;

    /// List live locks, optionally restricted to `resource_keys`.
    /// Purges rows expired at `now` as a side effect, so stale entries never
    /// leak into the result.
    fn lock_list_live(
        &self,
        resource_keys: Option<&[String]>,
        now: Timestamp,
    ) -> ColonyResult<Vec<FileLock>>;

    /// Delete every lock owned by `agent_id` regardless of expiry and return
    /// how many were deleted. Idempotent: repeating the call deletes zero and
    /// is not an error. Used only by the dead-agent sweep.
    fn lock_delete_for_agent(&self, agent_id: &str) -> ColonyResult<u64>;

    // === Task Operations ===

    /// Insert a new task. The id must be unused.
    fn task_insert(&self, task: &Task) -> ColonyResult<()>;

    /// Read-only snapshot of a task. Never mutates ownership.
    fn task_get(&self, task_id: EntityId) -> ColonyResult<Option<Task>>;

    /// Atomically select and claim the next eligible task for `agent_id`.
    ///
    /// Eligible: `Pending`, type admitted by `allowed_task_types`, and every
    /// dependency `Completed`. Selection: lowest `priority` value, ties by
    /// earliest `created_at`. The winner transitions to `Assigned` with
    /// `assigned_to`, `assigned_at = now`, and `attempt_count + 1` in the
    /// same atomic unit, so two simultaneous callers never receive the same
    /// task.
    fn task_claim_next(
        &self,
        agent_id: &str,
        allowed_task_types: Option<&[String]>,
        now: Timestamp,
    ) -> ColonyResult<Option<Task>>;

    /// Apply an ownership-checked terminal transition.
    ///
    /// `expected_owner = Some(agent)` requires `assigned_to` to match
    /// (the agent-reported completion path); `None` skips the check (the
    /// orchestrator cancellation path). `terminal` must be a terminal status.
    fn task_finish(
        &self,
        task_id: EntityId,
        expected_owner: Option<&str>,
        terminal: TaskStatus,
        result_payload: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> ColonyResult<TaskFinishOutcome>;

    /// List tasks by status.
    fn task_list_by_status(&self, status: TaskStatus) -> ColonyResult<Vec<Task>>;

    // === Session Operations ===

    /// Insert or replace a session row keyed by `session_id`.
    fn session_upsert(&self, session: &AgentSession) -> ColonyResult<()>;

    /// Get a session by id.
    fn session_get(&self, session_id: EntityId) -> ColonyResult<Option<AgentSession>>;

    /// Set `last_heartbeat = now` on an existing session. Returns false when
    /// the session is unknown.
    fn session_touch(&self, session_id: EntityId, now: Timestamp) -> ColonyResult<bool>;

    /// List sessions, optionally filtered by status.
    fn session_list(&self, status: Option<SessionStatus>) -> ColonyResult<Vec<AgentSession>>;

    /// Atomically flip every `Active` session with `last_heartbeat` before
    /// `cutoff` to `Disconnected` with `ended_at = now`, and return the
    /// flipped rows. Sessions are never deleted.
    fn session_reap_stale(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> ColonyResult<Vec<AgentSession>>;

    // === Handoff Operations ===

    /// Append a handoff document. Documents are immutable once written.
    fn handoff_append(&self, doc: &HandoffDocument) -> ColonyResult<()>;

    /// Return the `limit` most recent documents ordered by `created_at`
    /// descending (UUIDv7 id as tiebreak), optionally filtered by agent name.
    /// An empty list is a normal result, never an error.
    fn handoff_list_recent(
        &self,
        agent_name: Option<&str>,
        limit: usize,
    ) -> ColonyResult<Vec<HandoffDocument>>;

    // === Health & Diagnostics ===

    /// Check if the backend is reachable.
    fn health_check(&self) -> ColonyResult<bool>;

    /// Per-collection row counts.
    fn statistics(&self) -> ColonyResult<StoreStatistics>;
}

/// Pick the best claim candidate among eligible tasks: lowest priority value,
/// then earliest `created_at`, then smallest id (UUIDv7, so this last tiebreak
/// is also creation order within a millisecond).
///
/// Shared by backends so they cannot drift on ordering.
pub fn better_claim_candidate<'a>(current: Option<&'a Task>, candidate: &'a Task) -> bool {
    match current {
        None => true,
        Some(best) => {
            let candidate_key = (candidate.priority, candidate.created_at, candidate.task_id);
            let best_key = (best.priority, best.created_at, best.task_id);
            candidate_key < best_key
        }
    }
}

/// Check whether every dependency of `task` is `Completed`, given a lookup.
///
/// A dependency that cannot be found counts as incomplete; submission-time
/// validation makes that unreachable in practice, but a claim must never
/// hand out a task it cannot prove eligible.
pub fn dependencies_completed<F>(task: &Task, mut lookup: F) -> bool
where
    F: FnMut(EntityId) -> Option<TaskStatus>,
{
    task.depends_on
        .iter()
        .all(|dep| lookup(*dep) == Some(TaskStatus::Completed))
}
