#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Message ingestion pipeline: receives chat posts, persists and broadcasts
//! them synchronously, then classifies and processes them in a detached flow
//! so posting never blocks on the external provider.

pub mod grammar;
pub mod pipeline;

pub use grammar::{command_body, inline_priority, is_help, COMMAND_PREFIXES, HELP_TEXT};
pub use pipeline::MessagePipeline;

use thiserror::Error;
use uuid::Uuid;

use crewflow_directory::DirectoryError;

/// Errors surfaced to the poster of a message.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Sender is not a member of a restricted channel; rejected before
    /// persistence.
    #[error("user {user} may not post in channel {channel}")]
    NotAMember {
        /// Rejected sender.
        user: Uuid,
        /// Restricted channel.
        channel: Uuid,
    },
    /// Directory lookup failure (unknown channel, message, ...).
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    /// Persistence or broadcast failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
