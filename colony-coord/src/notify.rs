//! Best-effort change notification.
//!
//! A convenience for transports that want to push state changes to observers.
//! Delivery is not guaranteed: publishing to a feed with no subscribers, or
//! with lagged subscribers, silently drops the event. Nothing in the core
//! reads its own events back.

use colony_core::{EntityId, TaskStatus};
use tokio::sync::broadcast;

/// A state change in one of the coordination services.
#[derive(Debug, Clone)]
pub enum CoordEvent {
    LockAcquired {
        resource_key: String,
        owner_agent_id: String,
    },
    LockReleased {
        resource_key: String,
        owner_agent_id: String,
    },
    LocksReclaimed {
        agent_id: String,
        released: u64,
    },
    TaskSubmitted {
        task_id: EntityId,
        task_type: String,
    },
    TaskClaimed {
        task_id: EntityId,
        agent_id: String,
    },
    TaskFinished {
        task_id: EntityId,
        status: TaskStatus,
    },
    SessionRegistered {
        session_id: EntityId,
        agent_id: String,
    },
    AgentsSwept {
        reclaimed_agents: u64,
        released_locks: u64,
    },
}

/// Broadcast handle shared by the services.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<CoordEvent>,
}

impl ChangeFeed {
    /// Create a feed buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Drop it silently when nobody is listening.
    pub fn publish(&self, event: CoordEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(64)
    }
}
