//! COLONY Coordination Services
//!
//! Four stateless services layered on one durable store:
//! - [`LockManager`]: exclusive, TTL-bounded resource locks
//! - [`WorkQueue`]: priority/dependency-ordered tasks with exactly-once claiming
//! - [`AgentRegistry`]: heartbeat liveness and dead-agent reclamation
//! - [`HandoffLog`]: append-only session continuity notes
//!
//! Services hold no cross-call state: every call re-reads the store, so any
//! number of coordinator processes can run these services concurrently against
//! the same backend with identical behavior. No operation blocks waiting for
//! a resource - every call returns immediately with success or a definitive
//! negative outcome, and waiting/retry/backoff is the caller's responsibility.
//!
//! The only cross-service call in the crate is the registry's dead-agent
//! sweep invoking the lock manager's idempotent bulk release.

pub mod handoffs;
pub mod locks;
pub mod notify;
pub mod permission;
pub mod queue;
pub mod registry;

pub use handoffs::{HandoffDraft, HandoffLog};
pub use locks::{AcquireOutcome, LockManager};
pub use notify::{ChangeFeed, CoordEvent};
pub use permission::{operations, AllowAll, PermissionGate};
pub use queue::{ClaimOutcome, TaskSubmission, WorkQueue, CANCELLATION_CODE};
pub use registry::{AgentRegistry, HeartbeatOutcome, SweepReport};

// Storage outcome types that surface directly through service APIs.
pub use colony_storage::{LockReleaseOutcome, TaskFinishOutcome};
