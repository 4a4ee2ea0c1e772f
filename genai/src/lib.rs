#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Generative text client: wraps a rate-limited external text-generation
//! call with retry-with-backoff, and exposes the two operations the platform
//! needs: structured task extraction and free-form agent commentary.

pub mod extraction;
pub mod provider;
pub mod retry;

pub use extraction::{ExtractionClient, TaskDraft};
pub use provider::{
    CannedGenerator, Completion, CompletionRequest, GenerationError, HttpTextGenerator,
    TextGenerator,
};
pub use retry::RetryPolicy;
