//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped,
//! ACID key-value store. One named database per record collection:
//!
//! - `locks` keyed by `resource_key` bytes - the map key is the uniqueness
//!   domain, so "at most one live lock per resource" holds by construction.
//! - `tasks`, `sessions`, `handoffs` keyed by UUIDv7 bytes, so LMDB key order
//!   is creation order and recent-handoff reads are a reverse scan.
//!
//! # Atomicity
//!
//! Every mutating trait method runs inside a single write transaction. LMDB
//! allows one writer at a time, which gives the conditional operations the
//! same winner/loser serialization a row store gets from row-level locking.

use std::collections::HashMap;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;

use colony_core::{
    AgentSession, ColonyError, ColonyResult, EntityId, EntityType, FileLock, HandoffDocument,
    SessionStatus, StorageError, Task, TaskStatus, Timestamp,
};

use crate::{
    better_claim_candidate, dependencies_completed, DurableStore, LockAcquireOutcome,
    LockReleaseOutcome, StoreStatistics, TaskFinishOutcome,
};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for ColonyError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(_) | LmdbStoreError::Io(_) => {
                ColonyError::Storage(StorageError::Unavailable { reason: e.to_string() })
            }
            _ => ColonyError::Storage(StorageError::TransactionFailed { reason: e.to_string() }),
        }
    }
}

/// LMDB-backed implementation of [`DurableStore`].
pub struct LmdbStore {
    env: Env,
    locks: Database<Bytes, Bytes>,
    tasks: Database<Bytes, Bytes>,
    sessions: Database<Bytes, Bytes>,
    handoffs: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store rooted at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(4)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let locks = env
            .create_database(&mut wtxn, Some("locks"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let tasks = env
            .create_database(&mut wtxn, Some("tasks"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let sessions = env
            .create_database(&mut wtxn, Some("sessions"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let handoffs = env
            .create_database(&mut wtxn, Some("handoffs"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            locks,
            tasks,
            sessions,
            handoffs,
        })
    }
}

fn txn_err(e: heed::Error) -> ColonyError {
    LmdbStoreError::Transaction(e.to_string()).into()
}

fn encode<T: Serialize>(value: &T) -> ColonyResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()).into())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ColonyResult<T> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Serialization(e.to_string()).into())
}

impl DurableStore for LmdbStore {
    // === Lock Operations ===

    fn lock_acquire(&self, candidate: &FileLock, now: Timestamp) -> ColonyResult<LockAcquireOutcome> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let key = candidate.resource_key.as_bytes();

        let existing: Option<FileLock> = match self.locks.get(&wtxn, key).map_err(txn_err)? {
            Some(bytes) => Some(decode(bytes)?),
            None => None,
        };

        // Lazy expiry and conflict resolution under the same transaction as
        // the insert, so a racing acquire cannot produce two winners.
        let outcome = match existing {
            Some(lock) if !lock.is_expired(now) => {
                if lock.owner_agent_id == candidate.owner_agent_id {
                    let mut refreshed = lock;
                    refreshed.expires_at = candidate.expires_at;
                    self.locks
                        .put(&mut wtxn, key, &encode(&refreshed)?)
                        .map_err(txn_err)?;
                    LockAcquireOutcome::Refreshed(refreshed)
                } else {
                    LockAcquireOutcome::Conflict(lock)
                }
            }
            _ => {
                self.locks
                    .put(&mut wtxn, key, &encode(candidate)?)
                    .map_err(txn_err)?;
                LockAcquireOutcome::Acquired(candidate.clone())
            }
        };

        wtxn.commit().map_err(txn_err)?;
        Ok(outcome)
    }

    fn lock_release(
        &self,
        resource_key: &str,
        owner_agent_id: &str,
    ) -> ColonyResult<LockReleaseOutcome> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let key = resource_key.as_bytes();

        let existing: Option<FileLock> = match self.locks.get(&wtxn, key).map_err(txn_err)? {
            Some(bytes) => Some(decode(bytes)?),
            None => None,
        };

        let outcome = match existing {
            None => LockReleaseOutcome::NotFound,
            Some(lock) if lock.owner_agent_id != owner_agent_id => LockReleaseOutcome::NotOwner {
                owner_agent_id: lock.owner_agent_id,
            },
            Some(_) => {
                self.locks.delete(&mut wtxn, key).map_err(txn_err)?;
                LockReleaseOutcome::Released
            }
        };

        wtxn.commit().map_err(txn_err)?;
        Ok(outcome)
    }

    fn lock_list_live(
        &self,
        resource_keys: Option<&[String]>,
        now: Timestamp,
    ) -> ColonyResult<Vec<FileLock>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut expired: Vec<Vec<u8>> = Vec::new();
        let mut live: Vec<FileLock> = Vec::new();
        {
            let iter = self.locks.iter(&wtxn).map_err(txn_err)?;
            for entry in iter {
                let (key, bytes) = entry.map_err(txn_err)?;
                let lock: FileLock = decode(bytes)?;
                if lock.is_expired(now) {
                    expired.push(key.to_vec());
                } else {
                    let wanted = match resource_keys {
                        None => true,
                        Some(keys) => keys.iter().any(|k| k == &lock.resource_key),
                    };
                    if wanted {
                        live.push(lock);
                    }
                }
            }
        }

        for key in expired {
            self.locks.delete(&mut wtxn, &key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        live.sort_by(|a, b| a.resource_key.cmp(&b.resource_key));
        Ok(live)
    }

    fn lock_delete_for_agent(&self, agent_id: &str) -> ColonyResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut owned: Vec<Vec<u8>> = Vec::new();
        {
            let iter = self.locks.iter(&wtxn).map_err(txn_err)?;
            for entry in iter {
                let (key, bytes) = entry.map_err(txn_err)?;
                let lock: FileLock = decode(bytes)?;
                if lock.owner_agent_id == agent_id {
                    owned.push(key.to_vec());
                }
            }
        }

        let count = owned.len() as u64;
        for key in owned {
            self.locks.delete(&mut wtxn, &key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(count)
    }

    // === Task Operations ===

    fn task_insert(&self, task: &Task) -> ColonyResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let key = task.task_id.as_bytes().to_vec();

        if self.tasks.get(&wtxn, &key).map_err(txn_err)?.is_some() {
            return Err(ColonyError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Task,
                reason: "already exists".to_string(),
            }));
        }
        self.tasks
            .put(&mut wtxn, &key, &encode(task)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn task_get(&self, task_id: EntityId) -> ColonyResult<Option<Task>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self
            .tasks
            .get(&rtxn, task_id.as_bytes())
            .map_err(txn_err)?
        {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn task_claim_next(
        &self,
        agent_id: &str,
        allowed_task_types: Option<&[String]>,
        now: Timestamp,
    ) -> ColonyResult<Option<Task>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        // One decode pass: statuses for dependency gating, plus candidates.
        // The iteration runs in key order, i.e. creation order (UUIDv7).
        let mut statuses: HashMap<EntityId, TaskStatus> = HashMap::new();
        let mut candidates: Vec<Task> = Vec::new();
        {
            let iter = self.tasks.iter(&wtxn).map_err(txn_err)?;
            for entry in iter {
                let (_, bytes) = entry.map_err(txn_err)?;
                let task: Task = decode(bytes)?;
                statuses.insert(task.task_id, task.status);
                if task.status == TaskStatus::Pending && task.matches_types(allowed_task_types) {
                    candidates.push(task);
                }
            }
        }

        let mut best: Option<&Task> = None;
        for task in &candidates {
            if !dependencies_completed(task, |dep| statuses.get(&dep).copied()) {
                continue;
            }
            if better_claim_candidate(best, task) {
                best = Some(task);
            }
        }

        let mut winner = match best {
            Some(task) => task.clone(),
            None => return Ok(None),
        };
        winner.status = TaskStatus::Assigned;
        winner.assigned_to = Some(agent_id.to_string());
        winner.assigned_at = Some(now);
        winner.attempt_count += 1;

        self.tasks
            .put(&mut wtxn, &winner.task_id.as_bytes().to_vec(), &encode(&winner)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(Some(winner))
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

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let key = task_id.as_bytes().to_vec();

        let mut task: Task = match self.tasks.get(&wtxn, &key).map_err(txn_err)? {
            Some(bytes) => decode(bytes)?,
            None => return Ok(TaskFinishOutcome::NotFound),
        };

        if task.status.is_terminal() {
            return Ok(TaskFinishOutcome::AlreadyTerminal(task));
        }
        if let Some(owner) = expected_owner {
            if task.assigned_to.as_deref() != Some(owner) {
                return Ok(TaskFinishOutcome::NotOwner {
                    assigned_to: task.assigned_to,
                });
            }
        }

        task.status = terminal;
        task.result_payload = result_payload;
        task.error_message = error_message;

        self.tasks
            .put(&mut wtxn, &key, &encode(&task)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(TaskFinishOutcome::Updated(task))
    }

    fn task_list_by_status(&self, status: TaskStatus) -> ColonyResult<Vec<Task>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut result = Vec::new();
        let iter = self.tasks.iter(&rtxn).map_err(txn_err)?;
        for entry in iter {
            let (_, bytes) = entry.map_err(txn_err)?;
            let task: Task = decode(bytes)?;
            if task.status == status {
                result.push(task);
            }
        }
        Ok(result)
    }

    // === Session Operations ===

    fn session_upsert(&self, session: &AgentSession) -> ColonyResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.sessions
            .put(
                &mut wtxn,
                &session.session_id.as_bytes().to_vec(),
                &encode(session)?,
            )
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn session_get(&self, session_id: EntityId) -> ColonyResult<Option<AgentSession>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self
            .sessions
            .get(&rtxn, session_id.as_bytes())
            .map_err(txn_err)?
        {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn session_touch(&self, session_id: EntityId, now: Timestamp) -> ColonyResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let key = session_id.as_bytes().to_vec();

        let mut session: AgentSession = match self.sessions.get(&wtxn, &key).map_err(txn_err)? {
            Some(bytes) => decode(bytes)?,
            None => return Ok(false),
        };
        session.heartbeat(now);
        self.sessions
            .put(&mut wtxn, &key, &encode(&session)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    fn session_list(&self, status: Option<SessionStatus>) -> ColonyResult<Vec<AgentSession>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut result = Vec::new();
        let iter = self.sessions.iter(&rtxn).map_err(txn_err)?;
        for entry in iter {
            let (_, bytes) = entry.map_err(txn_err)?;
            let session: AgentSession = decode(bytes)?;
            if status.is_none_or(|wanted| session.status == wanted) {
                result.push(session);
            }
        }
        Ok(result)
    }

    fn session_reap_stale(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> ColonyResult<Vec<AgentSession>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut stale: Vec<AgentSession> = Vec::new();
        {
            let iter = self.sessions.iter(&wtxn).map_err(txn_err)?;
            for entry in iter {
                let (_, bytes) = entry.map_err(txn_err)?;
                let session: AgentSession = decode(bytes)?;
                if session.status == SessionStatus::Active && session.last_heartbeat < cutoff {
                    stale.push(session);
                }
            }
        }

        let mut reaped = Vec::with_capacity(stale.len());
        for mut session in stale {
            session.disconnect(now);
            self.sessions
                .put(
                    &mut wtxn,
                    &session.session_id.as_bytes().to_vec(),
                    &encode(&session)?,
                )
                .map_err(txn_err)?;
            reaped.push(session);
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(reaped)
    }

    // === Handoff Operations ===

    fn handoff_append(&self, doc: &HandoffDocument) -> ColonyResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.handoffs
            .put(
                &mut wtxn,
                &doc.handoff_id.as_bytes().to_vec(),
                &encode(doc)?,
            )
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn handoff_list_recent(
        &self,
        agent_name: Option<&str>,
        limit: usize,
    ) -> ColonyResult<Vec<HandoffDocument>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut result = Vec::new();

        // UUIDv7 keys: a reverse scan visits newest documents first.
        let iter = self.handoffs.rev_iter(&rtxn).map_err(txn_err)?;
        for entry in iter {
            if result.len() >= limit {
                break;
            }
            let (_, bytes) = entry.map_err(txn_err)?;
            let doc: HandoffDocument = decode(bytes)?;
            if agent_name.is_none_or(|name| doc.agent_name == name) {
                result.push(doc);
            }
        }
        Ok(result)
    }

    // === Health & Diagnostics ===

    fn health_check(&self) -> ColonyResult<bool> {
        Ok(self.env.read_txn().is_ok())
    }

    fn statistics(&self) -> ColonyResult<StoreStatistics> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(StoreStatistics {
            lock_count: self.locks.len(&rtxn).map_err(txn_err)?,
            task_count: self.tasks.len(&rtxn).map_err(txn_err)?,
            session_count: self.sessions.len(&rtxn).map_err(txn_err)?,
            handoff_count: self.handoffs.len(&rtxn).map_err(txn_err)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn open_store() -> (tempfile::TempDir, LmdbStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LmdbStore::open(dir.path(), 16).expect("open store");
        (dir, store)
    }

    #[test]
    fn test_lock_roundtrip_and_conflict() {
        let (_dir, store) = open_store();
        let now = Utc::now();

        let lock = FileLock::new("src/a.rs", "agent-a", "coder", Duration::from_secs(60));
        assert!(matches!(
            store.lock_acquire(&lock, now).unwrap(),
            LockAcquireOutcome::Acquired(_)
        ));

        let rival = FileLock::new("src/a.rs", "agent-b", "coder", Duration::from_secs(60));
        assert!(matches!(
            store.lock_acquire(&rival, now).unwrap(),
            LockAcquireOutcome::Conflict(_)
        ));

        let listed = store.lock_list_live(None, now).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner_agent_id, "agent-a");
    }

    #[test]
    fn test_expired_lock_purged_on_list() {
        let (_dir, store) = open_store();
        let now = Utc::now();

        let dead = FileLock::new("src/a.rs", "agent-a", "coder", Duration::ZERO);
        store.lock_acquire(&dead, now).unwrap();

        assert!(store.lock_list_live(None, Utc::now()).unwrap().is_empty());
        assert_eq!(store.statistics().unwrap().lock_count, 0);
    }

    #[test]
    fn test_task_claim_is_persisted() {
        let (_dir, store) = open_store();
        let now = Utc::now();

        let task = Task::new("implement", "persisted work");
        store.task_insert(&task).unwrap();

        let claimed = store.task_claim_next("agent-a", None, now).unwrap().unwrap();
        assert_eq!(claimed.task_id, task.task_id);
        assert_eq!(claimed.attempt_count, 1);

        let reread = store.task_get(task.task_id).unwrap().unwrap();
        assert_eq!(reread.status, TaskStatus::Assigned);
        assert_eq!(reread.assigned_to.as_deref(), Some("agent-a"));

        assert!(store.task_claim_next("agent-b", None, now).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_task_insert_rejected() {
        let (_dir, store) = open_store();
        let task = Task::new("implement", "once");
        store.task_insert(&task).unwrap();
        assert!(store.task_insert(&task).is_err());
    }

    #[test]
    fn test_dependency_gating_across_claims() {
        let (_dir, store) = open_store();
        let now = Utc::now();

        let a = Task::new("implement", "a").with_priority(1);
        let b = Task::new("implement", "b")
            .with_priority(1)
            .with_dependencies(vec![a.task_id]);
        store.task_insert(&a).unwrap();
        store.task_insert(&b).unwrap();

        let first = store.task_claim_next("agent-x", None, now).unwrap().unwrap();
        assert_eq!(first.task_id, a.task_id);
        // b is blocked while a is merely assigned.
        assert!(store.task_claim_next("agent-y", None, now).unwrap().is_none());

        store
            .task_finish(a.task_id, Some("agent-x"), TaskStatus::Completed, None, None)
            .unwrap();
        let second = store.task_claim_next("agent-y", None, now).unwrap().unwrap();
        assert_eq!(second.task_id, b.task_id);
    }

    #[test]
    fn test_sessions_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = AgentSession::new("agent-a", "coder", vec!["rust".to_string()]);
        {
            let store = LmdbStore::open(dir.path(), 16).expect("open store");
            store.session_upsert(&session).unwrap();
        }
        let store = LmdbStore::open(dir.path(), 16).expect("reopen store");
        let reread = store.session_get(session.session_id).unwrap().unwrap();
        assert_eq!(reread.agent_id, "agent-a");
        assert!(reread.has_capability("rust"));
    }

    #[test]
    fn test_handoff_recent_ordering() {
        let (_dir, store) = open_store();
        for summary in ["first", "second", "third"] {
            store
                .handoff_append(&HandoffDocument::new("agent-a", summary))
                .unwrap();
        }

        let recent = store.handoff_list_recent(Some("agent-a"), 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].summary, "third");
        assert_eq!(recent[1].summary, "second");
    }

    #[test]
    fn test_reap_stale_persists_disconnect() {
        let (_dir, store) = open_store();
        let now = Utc::now();

        let mut stale = AgentSession::new("agent-a", "coder", vec![]);
        stale.last_heartbeat = now - chrono::Duration::minutes(30);
        store.session_upsert(&stale).unwrap();

        let cutoff = now - chrono::Duration::minutes(15);
        let reaped = store.session_reap_stale(cutoff, now).unwrap();
        assert_eq!(reaped.len(), 1);

        let reread = store.session_get(stale.session_id).unwrap().unwrap();
        assert_eq!(reread.status, SessionStatus::Disconnected);
        assert_eq!(reread.ended_at, Some(now));
    }
}
