#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Task lifecycle store: owns the task entity, its status state machine,
//! timestamp bookkeeping, and score-based point settlement against user
//! accounts.

pub mod store;
pub mod task;

pub use store::TaskStore;
pub use task::{NewTask, Priority, Task, TaskComment, TaskPatch, TaskStatus};

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to direct callers of the lifecycle store.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Referenced task does not exist.
    #[error("task {0} not found")]
    NotFound(Uuid),
    /// Broadcast or serialization failure while applying a mutation.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
