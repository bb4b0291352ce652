//! Exclusive, TTL-bounded resource locking.
//!
//! Conflicts are a normal negative result the caller branches on, never an
//! error: a denied caller decides for itself whether to re-poll or work
//! elsewhere. There is no fairness guarantee and no queue of waiters.

use std::sync::Arc;
use std::time::Duration;

use colony_core::{
    CallerContext, ColonyResult, CoordConfig, FileLock, LockStatus, Timestamp, ValidationError,
};
use colony_storage::{DurableStore, LockAcquireOutcome, LockReleaseOutcome};
use tracing::debug;

use crate::notify::{ChangeFeed, CoordEvent};
use crate::permission::{ensure_permitted, operations, AllowAll, PermissionGate};

/// Result of an acquire attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// The caller now holds the lock.
    Acquired(FileLock),
    /// The caller already held the lock; its expiry was extended from now.
    Refreshed(FileLock),
    /// Someone else holds the lock. Re-poll after `expires_at` or work
    /// elsewhere; the core never queues a waiter.
    Conflict {
        owner_agent_id: String,
        expires_at: Timestamp,
    },
}

/// Exclusive resource locking over a [`DurableStore`].
pub struct LockManager {
    store: Arc<dyn DurableStore>,
    gate: Arc<dyn PermissionGate>,
    config: CoordConfig,
    feed: ChangeFeed,
}

impl LockManager {
    /// Create a manager with the default config and an allow-all gate.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            gate: Arc::new(AllowAll),
            config: CoordConfig::default(),
            feed: ChangeFeed::default(),
        }
    }

    /// Set the authorization gate.
    pub fn with_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: CoordConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a change feed with other services.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Try to acquire (or refresh) the exclusive lock on `resource_key`.
    ///
    /// `ttl` defaults to the configured lock TTL. A same-owner re-acquire
    /// extends the expiry to `ttl` from now. The expiry purge, conflict check,
    /// and insert happen in one store transaction, so concurrent acquires on
    /// the same key produce exactly one winner.
    pub fn acquire(
        &self,
        ctx: &CallerContext,
        resource_key: &str,
        reason: Option<&str>,
        context: Option<serde_json::Value>,
        ttl: Option<Duration>,
    ) -> ColonyResult<AcquireOutcome> {
        ensure_permitted(&*self.gate, operations::ACQUIRE_LOCK, ctx, resource_key)?;
        if resource_key.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "resource_key".to_string(),
            }
            .into());
        }

        let ttl = ttl.unwrap_or(self.config.default_lock_ttl);
        let mut candidate = FileLock::new(resource_key, &ctx.agent_id, &ctx.agent_type, ttl);
        if let Some(session_id) = ctx.session_id {
            candidate = candidate.with_session(session_id);
        }
        if let Some(reason) = reason {
            candidate = candidate.with_reason(reason);
        }
        if let Some(context) = context {
            candidate = candidate.with_context(context);
        }
        let now = candidate.acquired_at;

        let outcome = match self.store.lock_acquire(&candidate, now)? {
            LockAcquireOutcome::Acquired(lock) => {
                debug!(resource_key, owner = %ctx.agent_id, "lock acquired");
                self.feed.publish(CoordEvent::LockAcquired {
                    resource_key: lock.resource_key.clone(),
                    owner_agent_id: lock.owner_agent_id.clone(),
                });
                AcquireOutcome::Acquired(lock)
            }
            LockAcquireOutcome::Refreshed(lock) => {
                debug!(resource_key, owner = %ctx.agent_id, "lock refreshed");
                AcquireOutcome::Refreshed(lock)
            }
            LockAcquireOutcome::Conflict(existing) => {
                debug!(
                    resource_key,
                    owner = %existing.owner_agent_id,
                    "lock conflict"
                );
                AcquireOutcome::Conflict {
                    owner_agent_id: existing.owner_agent_id,
                    expires_at: existing.expires_at,
                }
            }
        };
        Ok(outcome)
    }

    /// Release the lock on `resource_key`. Only the recorded owner may
    /// release; a non-owner caller fails closed and changes nothing.
    pub fn release(&self, ctx: &CallerContext, resource_key: &str) -> ColonyResult<LockReleaseOutcome> {
        ensure_permitted(&*self.gate, operations::RELEASE_LOCK, ctx, resource_key)?;

        let outcome = self.store.lock_release(resource_key, &ctx.agent_id)?;
        if outcome == LockReleaseOutcome::Released {
            debug!(resource_key, owner = %ctx.agent_id, "lock released");
            self.feed.publish(CoordEvent::LockReleased {
                resource_key: resource_key.to_string(),
                owner_agent_id: ctx.agent_id.clone(),
            });
        }
        Ok(outcome)
    }

    /// Inspect live locks, optionally restricted to `resource_keys`.
    /// Performs the same lazy-expiry cleanup as acquisition, so stale entries
    /// never leak into the result.
    pub fn check(&self, ctx: &CallerContext, resource_keys: Option<&[String]>) -> ColonyResult<Vec<LockStatus>> {
        let now = ctx.now();
        let live = self.store.lock_list_live(resource_keys, now)?;
        Ok(live.iter().map(LockStatus::from).collect())
    }

    /// Delete every lock held by `agent_id`, regardless of expiry.
    ///
    /// Reserved for the agent registry's dead-agent sweep; the sweep itself is
    /// gated, so this call is not. Idempotent: repeating it deletes zero locks
    /// and is not an error.
    pub fn force_release_all_for_agent(&self, agent_id: &str) -> ColonyResult<u64> {
        let released = self.store.lock_delete_for_agent(agent_id)?;
        if released > 0 {
            debug!(agent_id, released, "force-released locks");
            self.feed.publish(CoordEvent::LocksReclaimed {
                agent_id: agent_id.to_string(),
                released,
            });
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_storage::MemoryStore;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_acquire_refresh_conflict_cycle() {
        let locks = manager();
        let alice = CallerContext::new("alice", "coder");
        let bob = CallerContext::new("bob", "coder");

        let first = locks
            .acquire(&alice, "src/lib.rs", Some("editing"), None, None)
            .unwrap();
        let acquired = match first {
            AcquireOutcome::Acquired(lock) => lock,
            other => panic!("expected Acquired, got {:?}", other),
        };

        // Same owner again: refreshed, expiry moves forward.
        match locks
            .acquire(&alice, "src/lib.rs", None, None, Some(Duration::from_secs(3600)))
            .unwrap()
        {
            AcquireOutcome::Refreshed(lock) => assert!(lock.expires_at > acquired.expires_at),
            other => panic!("expected Refreshed, got {:?}", other),
        }

        // Different owner: conflict names the holder.
        match locks.acquire(&bob, "src/lib.rs", None, None, None).unwrap() {
            AcquireOutcome::Conflict { owner_agent_id, .. } => {
                assert_eq!(owner_agent_id, "alice");
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_resource_key_rejected() {
        let locks = manager();
        let alice = CallerContext::new("alice", "coder");
        assert!(locks.acquire(&alice, "", None, None, None).is_err());
    }

    #[test]
    fn test_release_requires_ownership() {
        let locks = manager();
        let alice = CallerContext::new("alice", "coder");
        let bob = CallerContext::new("bob", "coder");

        locks.acquire(&alice, "src/lib.rs", None, None, None).unwrap();

        assert!(matches!(
            locks.release(&bob, "src/lib.rs").unwrap(),
            LockReleaseOutcome::NotOwner { .. }
        ));
        assert_eq!(
            locks.release(&alice, "src/lib.rs").unwrap(),
            LockReleaseOutcome::Released
        );
        assert_eq!(
            locks.release(&alice, "src/lib.rs").unwrap(),
            LockReleaseOutcome::NotFound
        );
    }

    #[test]
    fn test_check_reports_live_locks_only() {
        let locks = manager();
        let alice = CallerContext::new("alice", "coder");

        locks
            .acquire(&alice, "src/a.rs", None, None, Some(Duration::from_secs(60)))
            .unwrap();
        locks
            .acquire(&alice, "src/b.rs", None, None, Some(Duration::ZERO))
            .unwrap();

        let statuses = locks.check(&alice, None).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].resource_key, "src/a.rs");

        let filtered = locks
            .check(&alice, Some(&["src/b.rs".to_string()]))
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_force_release_is_idempotent() {
        let locks = manager();
        let alice = CallerContext::new("alice", "coder");
        locks.acquire(&alice, "src/a.rs", None, None, None).unwrap();
        locks.acquire(&alice, "src/b.rs", None, None, None).unwrap();

        assert_eq!(locks.force_release_all_for_agent("alice").unwrap(), 2);
        assert_eq!(locks.force_release_all_for_agent("alice").unwrap(), 0);
        assert!(locks.check(&alice, None).unwrap().is_empty());
    }

    #[test]
    fn test_denied_acquire_never_reaches_store() {
        struct DenyAll;
        impl PermissionGate for DenyAll {
            fn is_permitted(&self, _: &str, _: &CallerContext, _: &str) -> bool {
                false
            }
        }

        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::new(store.clone()).with_gate(Arc::new(DenyAll));
        let alice = CallerContext::new("alice", "coder");

        assert!(locks.acquire(&alice, "src/a.rs", None, None, None).is_err());
        assert_eq!(store.statistics().unwrap().lock_count, 0);
    }
}
