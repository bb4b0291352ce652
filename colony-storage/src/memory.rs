//! In-memory reference backend.
//!
//! One `RwLock` guard acquisition per trait method is the atomic unit, which
//! makes this backend exhibit exactly the winner/loser semantics the trait
//! promises. Useful for tests and for single-process deployments that do not
//! need durability.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use colony_core::{
    AgentSession, ColonyError, ColonyResult, EntityId, EntityType, FileLock, HandoffDocument,
    SessionStatus, StorageError, Task, TaskStatus, Timestamp,
};

use crate::{
    better_claim_candidate, dependencies_completed, DurableStore, LockAcquireOutcome,
    LockReleaseOutcome, StoreStatistics, TaskFinishOutcome,
};

/// In-memory store over `RwLock`-guarded maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    locks: Arc<RwLock<HashMap<String, FileLock>>>,
    tasks: Arc<RwLock<HashMap<EntityId, Task>>>,
    sessions: Arc<RwLock<HashMap<EntityId, AgentSession>>>,
    handoffs: Arc<RwLock<Vec<HandoffDocument>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        if let Ok(mut locks) = self.locks.write() {
            locks.clear();
        }
        if let Ok(mut tasks) = self.tasks.write() {
            tasks.clear();
        }
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.clear();
        }
        if let Ok(mut handoffs) = self.handoffs.write() {
            handoffs.clear();
        }
    }
}

fn poisoned<T>(_: T) -> ColonyError {
    ColonyError::Storage(StorageError::LockPoisoned)
}

impl DurableStore for MemoryStore {
    // === Lock Operations ===

    fn lock_acquire(&self, candidate: &FileLock, now: Timestamp) -> ColonyResult<LockAcquireOutcome> {
        let mut locks = self.locks.write().map_err(poisoned)?;

        // Lazy expiry: an expired row is treated as absent and removed here,
        // inside the same critical section as the conflict check below.
        if let Some(existing) = locks.get(&candidate.resource_key) {
            if existing.is_expired(now) {
                locks.remove(&candidate.resource_key);
            }
        }

        match locks.get_mut(&candidate.resource_key) {
            None => {
                locks.insert(candidate.resource_key.clone(), candidate.clone());
                Ok(LockAcquireOutcome::Acquired(candidate.clone()))
            }
            Some(existing) if existing.owner_agent_id == candidate.owner_agent_id => {
                existing.expires_at = candidate.expires_at;
                Ok(LockAcquireOutcome::Refreshed(existing.clone()))
            }
            Some(existing) => Ok(LockAcquireOutcome::Conflict(existing.clone())),
        }
    }

    fn lock_release(
        &self,
        resource_key: &str,
        owner_agent_id: &str,
    ) -> ColonyResult<LockReleaseOutcome> {
        let mut locks = self.locks.write().map_err(poisoned)?;
        match locks.get(resource_key) {
            None => Ok(LockReleaseOutcome::NotFound),
            Some(existing) if existing.owner_agent_id != owner_agent_id => {
                Ok(LockReleaseOutcome::NotOwner {
                    owner_agent_id: existing.owner_agent_id.clone(),
                })
            }
            Some(_) => {
                locks.remove(resource_key);
                Ok(LockReleaseOutcome::Released)
            }
        }
    }

    fn lock_list_live(
        &self,
        resource_keys: Option<&[String]>,
        now: Timestamp,
    ) -> ColonyResult<Vec<FileLock>> {
        let mut locks = self.locks.write().map_err(poisoned)?;
        locks.retain(|_, lock| !lock.is_expired(now));

        let mut result: Vec<FileLock> = locks
            .values()
            .filter(|lock| match resource_keys {
                None => true,
                Some(keys) => keys.iter().any(|k| k == &lock.resource_key),
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| a.resource_key.cmp(&b.resource_key));
        Ok(result)
    }

    fn lock_delete_for_agent(&self, agent_id: &str) -> ColonyResult<u64> {
        let mut locks = self.locks.write().map_err(poisoned)?;
        let before = locks.len();
        locks.retain(|_, lock| lock.owner_agent_id != agent_id);
        Ok((before - locks.len()) as u64)
    }

    // === Task Operations ===

    fn task_insert(&self, task: &Task) -> ColonyResult<()> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        if tasks.contains_key(&task.task_id) {
            return Err(ColonyError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Task,
                reason: "already exists".to_string(),
            }));
        }
        tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    fn task_get(&self, task_id: EntityId) -> ColonyResult<Option<Task>> {
        let tasks = self.tasks.read().map_err(poisoned)?;
        Ok(tasks.get(&task_id).cloned())
    }

    fn task_claim_next(
        &self,
        agent_id: &str,
        allowed_task_types: Option<&[String]>,
        now: Timestamp,
    ) -> ColonyResult<Option<Task>> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;

        let mut best: Option<&Task> = None;
        for task in tasks.values() {
            if task.status != TaskStatus::Pending || !task.matches_types(allowed_task_types) {
                continue;
            }
            if !dependencies_completed(task, |dep| tasks.get(&dep).map(|t| t.status)) {
                continue;
            }
            if better_claim_candidate(best, task) {
                best = Some(task);
            }
        }

        let winner_id = match best {
            Some(task) => task.task_id,
            None => return Ok(None),
        };

        let task = tasks
            .get_mut(&winner_id)
            .ok_or(ColonyError::Storage(StorageError::NotFound {
                entity_type: EntityType::Task,
                id: winner_id,
            }))?;
        task.status = TaskStatus::Assigned;
        task.assigned_to = Some(agent_id.to_string());
        task.assigned_at = Some(now);
        task.attempt_count += 1;
        Ok(Some(task.clone()))
    }

    fn task_finish(
        &self,
        task_id: EntityId,
        expected_owner: Option<&str>,
        terminal: TaskStatus,
        result_payload: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> ColonyResult<TaskFinishOutcome> {
        if !terminal.is_terminal() {
            return Err(ColonyError::Storage(StorageError::UpdateFailed {
                entity_type: EntityType::Task,
                id: task_id,
                reason: format!("{} is not a terminal status", terminal),
            }));
        }

        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let task = match tasks.get_mut(&task_id) {
            None => return Ok(TaskFinishOutcome::NotFound),
            Some(task) => task,
        };

        if task.status.is_terminal() {
            return Ok(TaskFinishOutcome::AlreadyTerminal(task.clone()));
        }
        if let Some(owner) = expected_owner {
            if task.assigned_to.as_deref() != Some(owner) {
                return Ok(TaskFinishOutcome::NotOwner {
                    assigned_to: task.assigned_to.clone(),
                });
            }
        }

        task.status = terminal;
        task.result_payload = result_payload;
        task.error_message = error_message;
        Ok(TaskFinishOutcome::Updated(task.clone()))
    }

    fn task_list_by_status(&self, status: TaskStatus) -> ColonyResult<Vec<Task>> {
        let tasks = self.tasks.read().map_err(poisoned)?;
        let mut result: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        result.sort_by_key(|t| (t.created_at, t.task_id));
        Ok(result)
    }

    // === Session Operations ===

    fn session_upsert(&self, session: &AgentSession) -> ColonyResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    fn session_get(&self, session_id: EntityId) -> ColonyResult<Option<AgentSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(&session_id).cloned())
    }

    fn session_touch(&self, session_id: EntityId, now: Timestamp) -> ColonyResult<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get_mut(&session_id) {
            None => Ok(false),
            Some(session) => {
                session.heartbeat(now);
                Ok(true)
            }
        }
    }

    fn session_list(&self, status: Option<SessionStatus>) -> ColonyResult<Vec<AgentSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let mut result: Vec<AgentSession> = sessions
            .values()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        result.sort_by_key(|s| (s.started_at, s.session_id));
        Ok(result)
    }

    fn session_reap_stale(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> ColonyResult<Vec<AgentSession>> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let mut reaped = Vec::new();
        for session in sessions.values_mut() {
            if session.status == SessionStatus::Active && session.last_heartbeat < cutoff {
                session.disconnect(now);
                reaped.push(session.clone());
            }
        }
        reaped.sort_by_key(|s| (s.started_at, s.session_id));
        Ok(reaped)
    }

    // === Handoff Operations ===

    fn handoff_append(&self, doc: &HandoffDocument) -> ColonyResult<()> {
        let mut handoffs = self.handoffs.write().map_err(poisoned)?;
        handoffs.push(doc.clone());
        Ok(())
    }

    fn handoff_list_recent(
        &self,
        agent_name: Option<&str>,
        limit: usize,
    ) -> ColonyResult<Vec<HandoffDocument>> {
        let handoffs = self.handoffs.read().map_err(poisoned)?;
        let mut result: Vec<HandoffDocument> = handoffs
            .iter()
            .filter(|doc| agent_name.is_none_or(|name| doc.agent_name == name))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            (b.created_at, b.handoff_id).cmp(&(a.created_at, a.handoff_id))
        });
        result.truncate(limit);
        Ok(result)
    }

    // === Health & Diagnostics ===

    fn health_check(&self) -> ColonyResult<bool> {
        Ok(!self.locks.is_poisoned()
            && !self.tasks.is_poisoned()
            && !self.sessions.is_poisoned()
            && !self.handoffs.is_poisoned())
    }

    fn statistics(&self) -> ColonyResult<StoreStatistics> {
        Ok(StoreStatistics {
            lock_count: self.locks.read().map_err(poisoned)?.len() as u64,
            task_count: self.tasks.read().map_err(poisoned)?.len() as u64,
            session_count: self.sessions.read().map_err(poisoned)?.len() as u64,
            handoff_count: self.handoffs.read().map_err(poisoned)?.len() as u64,
        })
    }
}
