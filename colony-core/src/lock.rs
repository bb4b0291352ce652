//! Exclusive resource locks.
//!
//! A `FileLock` represents exclusive ownership of one named resource,
//! conventionally a file path but any opaque string key. At most one live
//! (non-expired) lock row exists per `resource_key` at any instant; the
//! storage layer enforces that invariant, this module only carries the data.

use crate::{EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exclusive ownership of one named resource, bounded by a TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FileLock {
    /// Resource being locked. Unique among live locks.
    pub resource_key: String,
    /// Agent holding the lock.
    pub owner_agent_id: String,
    /// Kind of agent holding the lock.
    pub owner_agent_type: String,
    /// Session the owner was registered under, if any.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub session_id: Option<EntityId>,
    /// When the lock was acquired.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub acquired_at: Timestamp,
    /// When the lock expires and becomes reclaimable by anyone.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub expires_at: Timestamp,
    /// Free-text reason for holding the lock.
    pub reason: Option<String>,
    /// Structured metadata attached by the owner.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub context: Option<serde_json::Value>,
}

impl FileLock {
    /// Create a new lock expiring `ttl` from now.
    pub fn new(resource_key: &str, owner_agent_id: &str, owner_agent_type: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            resource_key: resource_key.to_string(),
            owner_agent_id: owner_agent_id.to_string(),
            owner_agent_type: owner_agent_type.to_string(),
            session_id: None,
            acquired_at: now,
            expires_at: now + chrono_duration(ttl),
            reason: None,
            context: None,
        }
    }

    /// Attach the owner's session.
    pub fn with_session(mut self, session_id: EntityId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Attach structured context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Check if the lock has expired at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Check if `agent_id` is the recorded owner.
    pub fn is_owned_by(&self, agent_id: &str) -> bool {
        self.owner_agent_id == agent_id
    }

    /// Push the expiry to `ttl` from `now`.
    ///
    /// Refresh is anchored at `now`, not at the previous expiry, so repeated
    /// refreshes never accumulate beyond one TTL of headroom.
    pub fn refresh(&mut self, ttl: Duration, now: Timestamp) {
        self.expires_at = now + chrono_duration(ttl);
    }

    /// Remaining duration until expiry, `None` once expired.
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

/// Live-lock summary returned by lock inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LockStatus {
    pub resource_key: String,
    pub owner_agent_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub expires_at: Timestamp,
}

impl From<&FileLock> for LockStatus {
    fn from(lock: &FileLock) -> Self {
        Self {
            resource_key: lock.resource_key.clone(),
            owner_agent_id: lock.owner_agent_id.clone(),
            expires_at: lock.expires_at,
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX))
}
