//! Agent liveness registry and dead-agent reclamation.
//!
//! Agents register a session, heartbeat it while alive, and disappear without
//! ceremony when they crash. The sweep is the sole timeout mechanism: invoked
//! periodically by an external scheduler, it flips stale sessions to
//! disconnected and then releases their orphaned locks through the Lock
//! Manager. That cross-service call is deliberately a two-step sequence
//! rather than one transaction spanning both services: the bulk release is
//! idempotent, so a sweep interrupted between the steps is fixed by simply
//! running it again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colony_core::{
    AgentSession, CallerContext, ColonyResult, CoordConfig, EntityId, SessionStatus,
};
use colony_storage::DurableStore;
use tracing::{debug, info};

use crate::locks::LockManager;
use crate::notify::{ChangeFeed, CoordEvent};
use crate::permission::{ensure_permitted, operations, AllowAll, PermissionGate};

/// Result of a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The session exists; its heartbeat was refreshed.
    Recorded,
    /// No such session is registered.
    AgentNotFound,
}

/// What a sweep reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions flipped from active to disconnected.
    pub reclaimed_agents: u64,
    /// Locks force-released on behalf of reclaimed agents.
    pub released_locks: u64,
}

/// Liveness tracking and capability discovery over a [`DurableStore`].
pub struct AgentRegistry {
    store: Arc<dyn DurableStore>,
    locks: Arc<LockManager>,
    gate: Arc<dyn PermissionGate>,
    config: CoordConfig,
    feed: ChangeFeed,
}

impl AgentRegistry {
    /// Create a registry wired to the lock manager it reclaims through.
    pub fn new(store: Arc<dyn DurableStore>, locks: Arc<LockManager>) -> Self {
        Self {
            store,
            locks,
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

    /// Register (or re-register) a session for the calling agent.
    ///
    /// Reuses `ctx.session_id` when the caller carries one, minting a fresh
    /// id otherwise. Re-registering an existing session reactivates it and
    /// replaces its advertised capabilities; `started_at` is preserved.
    pub fn register(
        &self,
        ctx: &CallerContext,
        capabilities: Vec<String>,
        current_task: Option<EntityId>,
    ) -> ColonyResult<AgentSession> {
        ensure_permitted(&*self.gate, operations::REGISTER_SESSION, ctx, &ctx.agent_id)?;
        let now = ctx.now();

        let existing = match ctx.session_id {
            Some(session_id) => self.store.session_get(session_id)?,
            None => None,
        };
        let session = match existing {
            Some(mut session) => {
                session.status = SessionStatus::Active;
                session.agent_id = ctx.agent_id.clone();
                session.agent_type = ctx.agent_type.clone();
                session.capabilities = capabilities;
                session.current_task = current_task;
                session.last_heartbeat = now;
                session.ended_at = None;
                session
            }
            None => {
                let mut session = AgentSession::new(&ctx.agent_id, &ctx.agent_type, capabilities);
                if let Some(session_id) = ctx.session_id {
                    session = session.with_session_id(session_id);
                }
                if let Some(task_id) = current_task {
                    session = session.with_current_task(task_id);
                }
                session
            }
        };

        self.store.session_upsert(&session)?;
        debug!(session_id = %session.session_id, agent = %session.agent_id, "session registered");
        self.feed.publish(CoordEvent::SessionRegistered {
            session_id: session.session_id,
            agent_id: session.agent_id.clone(),
        });
        Ok(session)
    }

    /// Refresh the heartbeat of an existing session.
    pub fn heartbeat(&self, ctx: &CallerContext, session_id: EntityId) -> ColonyResult<HeartbeatOutcome> {
        ensure_permitted(&*self.gate, operations::HEARTBEAT, ctx, &ctx.agent_id)?;
        if self.store.session_touch(session_id, ctx.now())? {
            Ok(HeartbeatOutcome::Recorded)
        } else {
            Ok(HeartbeatOutcome::AgentNotFound)
        }
    }

    /// List sessions, filtered by capability and status.
    ///
    /// With no status filter, only `Active` sessions are returned: discovery
    /// answers "who can I hand work to right now". Pass an explicit status to
    /// inspect idle or disconnected history.
    pub fn discover(
        &self,
        capability: Option<&str>,
        status: Option<SessionStatus>,
    ) -> ColonyResult<Vec<AgentSession>> {
        let wanted = status.unwrap_or(SessionStatus::Active);
        let sessions = self.store.session_list(Some(wanted))?;
        Ok(sessions
            .into_iter()
            .filter(|s| capability.is_none_or(|c| s.has_capability(c)))
            .collect())
    }

    /// Declare agents with stale heartbeats dead and reclaim their locks.
    ///
    /// Phase 1 atomically flips every active session whose heartbeat is older
    /// than `stale_threshold` (default from config) to `Disconnected`.
    /// Phase 2 force-releases each reclaimed agent's locks - idempotent, so
    /// repeating a sweep (or re-running one that died between the phases)
    /// converges on the same end state.
    pub fn sweep_dead_agents(
        &self,
        ctx: &CallerContext,
        stale_threshold: Option<Duration>,
    ) -> ColonyResult<SweepReport> {
        ensure_permitted(&*self.gate, operations::SWEEP_DEAD_AGENTS, ctx, "registry")?;

        let threshold = stale_threshold.unwrap_or(self.config.stale_threshold);
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));

        let reaped = self.store.session_reap_stale(cutoff, now)?;
        let mut report = SweepReport {
            reclaimed_agents: reaped.len() as u64,
            released_locks: 0,
        };
        for session in &reaped {
            report.released_locks += self.locks.force_release_all_for_agent(&session.agent_id)?;
        }

        if report.reclaimed_agents > 0 {
            info!(
                reclaimed = report.reclaimed_agents,
                released = report.released_locks,
                "dead-agent sweep reclaimed sessions"
            );
            self.feed.publish(CoordEvent::AgentsSwept {
                reclaimed_agents: report.reclaimed_agents,
                released_locks: report.released_locks,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_storage::MemoryStore;
    use uuid::Uuid;

    fn registry() -> (Arc<MemoryStore>, Arc<LockManager>, AgentRegistry) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let locks = Arc::new(LockManager::new(store.clone()));
        let registry = AgentRegistry::new(store.clone(), locks.clone());
        (store, locks, registry)
    }

    #[test]
    fn test_register_and_heartbeat() {
        let (_store, _locks, registry) = registry();
        let ctx = CallerContext::new("alice", "coder");

        let session = registry
            .register(&ctx, vec!["rust".to_string()], None)
            .unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        assert_eq!(
            registry.heartbeat(&ctx, session.session_id).unwrap(),
            HeartbeatOutcome::Recorded
        );
        assert_eq!(
            registry.heartbeat(&ctx, Uuid::now_v7()).unwrap(),
            HeartbeatOutcome::AgentNotFound
        );
    }

    #[test]
    fn test_reregister_preserves_started_at() {
        let (_store, _locks, registry) = registry();
        let ctx = CallerContext::new("alice", "coder");

        let first = registry.register(&ctx, vec![], None).unwrap();
        let ctx = ctx.with_session(first.session_id);
        let second = registry
            .register(&ctx, vec!["rust".to_string()], None)
            .unwrap();

        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.started_at, first.started_at);
        assert!(second.has_capability("rust"));
    }

    #[test]
    fn test_discover_filters_capability_and_defaults_to_active() {
        let (store, _locks, registry) = registry();
        let alice = CallerContext::new("alice", "coder");
        let bob = CallerContext::new("bob", "reviewer");

        registry
            .register(&alice, vec!["rust".to_string()], None)
            .unwrap();
        let bob_session = registry
            .register(&bob, vec!["review".to_string()], None)
            .unwrap();

        // Disconnect bob out of band.
        let mut dead = store.session_get(bob_session.session_id).unwrap().unwrap();
        dead.disconnect(Utc::now());
        store.session_upsert(&dead).unwrap();

        let found = registry.discover(None, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].agent_id, "alice");

        assert!(registry.discover(Some("review"), None).unwrap().is_empty());
        assert_eq!(
            registry
                .discover(None, Some(SessionStatus::Disconnected))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_sweep_reclaims_stale_agents_and_their_locks() {
        let (store, locks, registry) = registry();
        let alice = CallerContext::new("alice", "coder");

        let session = registry.register(&alice, vec![], None).unwrap();
        locks.acquire(&alice, "src/a.rs", None, None, None).unwrap();
        locks.acquire(&alice, "src/b.rs", None, None, None).unwrap();

        // Age the heartbeat past the threshold.
        let mut stale = store.session_get(session.session_id).unwrap().unwrap();
        stale.last_heartbeat = Utc::now() - chrono::Duration::minutes(30);
        store.session_upsert(&stale).unwrap();

        let sweeper = CallerContext::new("sweeper", "orchestrator");
        let report = registry
            .sweep_dead_agents(&sweeper, Some(Duration::from_secs(15 * 60)))
            .unwrap();
        assert_eq!(report.reclaimed_agents, 1);
        assert_eq!(report.released_locks, 2);

        let after = store.session_get(session.session_id).unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Disconnected);
        assert!(after.ended_at.is_some());
        assert!(locks.check(&sweeper, None).unwrap().is_empty());

        // Sweeping again reclaims nothing and releases nothing.
        let again = registry
            .sweep_dead_agents(&sweeper, Some(Duration::from_secs(15 * 60)))
            .unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[test]
    fn test_sweep_spares_fresh_agents() {
        let (_store, _locks, registry) = registry();
        let alice = CallerContext::new("alice", "coder");
        registry.register(&alice, vec![], None).unwrap();

        let sweeper = CallerContext::new("sweeper", "orchestrator");
        let report = registry.sweep_dead_agents(&sweeper, None).unwrap();
        assert_eq!(report.reclaimed_agents, 0);
        assert_eq!(registry.discover(None, None).unwrap().len(), 1);
    }
}
