//! Configuration types

use crate::{ColonyResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the coordination services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CoordConfig {
    /// Lock TTL used when an acquire call does not specify one.
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub default_lock_ttl: Duration,
    /// Heartbeat age past which an active session is declared dead.
    /// Sized to tolerate long single operations (a multi-minute test suite)
    /// without requiring the agent to interleave heartbeats.
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub stale_threshold: Duration,
    /// Priority assigned to submissions that omit one. Lower is more urgent.
    pub default_priority: i32,
    /// Claim budget assigned to submissions that omit one.
    pub default_max_attempts: i32,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            default_lock_ttl: Duration::from_secs(10 * 60),
            stale_threshold: Duration::from_secs(15 * 60),
            default_priority: 5,
            default_max_attempts: 3,
        }
    }
}

impl CoordConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ColonyResult<()> {
        if self.default_lock_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "default_lock_ttl".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.stale_threshold.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "stale_threshold".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.default_max_attempts < 1 {
            return Err(ConfigError::InvalidValue {
                field: "default_max_attempts".to_string(),
                value: self.default_max_attempts.to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
