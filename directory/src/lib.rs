#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Directory of users, departments, channels, and chat messages. Thin CRUD
//! collaborators consumed by the ingestion pipeline, the task lifecycle
//! store, and the squad dispatcher.

pub mod messages;
pub mod org;
pub mod users;

pub use messages::{Message, MessageLog, NewMessage};
pub use org::{Channel, ChannelKind, ChannelRegistry, Department, DepartmentRegistry};
pub use users::{User, UserDirectory};

use thiserror::Error;
use uuid::Uuid;

/// Errors emitted by directory lookups and mutations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Referenced user does not exist.
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    /// Referenced department does not exist.
    #[error("department {0} not found")]
    DepartmentNotFound(Uuid),
    /// Referenced channel does not exist.
    #[error("channel {0} not found")]
    ChannelNotFound(Uuid),
    /// Referenced message does not exist.
    #[error("message {0} not found")]
    MessageNotFound(Uuid),
    /// Sender is not allowed to post into a restricted channel.
    #[error("user {user} is not a member of channel {channel}")]
    NotAMember {
        /// Rejected sender.
        user: Uuid,
        /// Restricted channel.
        channel: Uuid,
    },
}
