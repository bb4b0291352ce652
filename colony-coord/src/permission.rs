//! Authorization extension point.
//!
//! An external policy layer may veto any mutating operation before it reaches
//! the store. The core only asks a yes/no question; interpreting credentials,
//! roles, or guardrail rules is entirely the gate implementation's concern.
//! Without a gate, every call is permitted.

use colony_core::{CallerContext, ColonyResult, CoordinationError};

/// Operation names passed to the gate, one per mutating operation.
pub mod operations {
    pub const ACQUIRE_LOCK: &str = "acquire_lock";
    pub const RELEASE_LOCK: &str = "release_lock";
    pub const SUBMIT_TASK: &str = "submit_task";
    pub const CLAIM_TASK: &str = "claim_task";
    pub const COMPLETE_TASK: &str = "complete_task";
    pub const CANCEL_TASK: &str = "cancel_task";
    pub const REGISTER_SESSION: &str = "register_session";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const SWEEP_DEAD_AGENTS: &str = "sweep_dead_agents";
    pub const WRITE_HANDOFF: &str = "write_handoff";
}

/// Decision function consulted before every mutating operation.
pub trait PermissionGate: Send + Sync {
    /// Whether `caller` may perform `operation` on `resource`.
    fn is_permitted(&self, operation: &str, caller: &CallerContext, resource: &str) -> bool;
}

/// The default gate: every call is permitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn is_permitted(&self, _operation: &str, _caller: &CallerContext, _resource: &str) -> bool {
        true
    }
}

/// Check the gate and turn a veto into a `PermissionDenied` error.
pub(crate) fn ensure_permitted(
    gate: &dyn PermissionGate,
    operation: &str,
    caller: &CallerContext,
    resource: &str,
) -> ColonyResult<()> {
    if gate.is_permitted(operation, caller, resource) {
        Ok(())
    } else {
        Err(CoordinationError::PermissionDenied {
            agent_id: caller.agent_id.clone(),
            operation: operation.to_string(),
            resource: resource.to_string(),
        }
        .into())
    }
}
