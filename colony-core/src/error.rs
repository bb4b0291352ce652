//! Error types for COLONY operations
//!
//! Only genuinely exceptional conditions live here. Expected negative
//! outcomes (lock conflict, empty queue, not-owner, unknown session) are
//! variants of per-operation outcome enums in `colony-coord`, so callers
//! branch on them as normal control flow instead of catching errors.

use crate::EntityId;
use thiserror::Error;

/// Entity type discriminator for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Lock,
    Task,
    Session,
    Handoff,
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: EntityId },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: EntityId,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    /// The backing store cannot be reached at all. This is the only error
    /// kind eligible for caller-side retry; the core never retries it.
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Validation errors raised before anything is written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown dependency task: {task_id}")]
    UnknownDependency { task_id: EntityId },

    #[error("Circular dependency detected: {ids:?}")]
    CircularDependency { ids: Vec<EntityId> },
}

/// Coordination-layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Permission denied for agent {agent_id}: {operation} on {resource}")]
    PermissionDenied {
        agent_id: String,
        operation: String,
        resource: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all COLONY errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ColonyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for COLONY operations.
pub type ColonyResult<T> = Result<T, ColonyError>;

// =============================================================================
// TESTS
// =============================================================================
