//! COLONY Core - Entity Types
//!
//! Pure data structures with no behavior beyond their own state model.
//! All other crates depend on this. This crate contains ONLY data types,
//! error taxonomy, and configuration - no coordination logic.

pub mod config;
pub mod context;
pub mod error;
pub mod handoff;
pub mod identity;
pub mod lock;
pub mod session;
pub mod task;

pub use config::CoordConfig;
pub use context::CallerContext;
pub use error::{
    ColonyError, ColonyResult, ConfigError, CoordinationError, EntityType, StorageError,
    ValidationError,
};
pub use handoff::HandoffDocument;
pub use identity::{new_entity_id, DurationMs, EntityId, Timestamp};
pub use lock::{FileLock, LockStatus};
pub use session::{AgentSession, SessionStatus, SessionStatusParseError};
pub use task::{Task, TaskStatus, TaskStatusParseError};
