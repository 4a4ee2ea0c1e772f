#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Squad agents: one automated commentator per department, reacting to task
//! lifecycle events and to being addressed by name in chat.

pub mod dispatcher;
pub mod roster;

pub use dispatcher::SquadDispatcher;
pub use roster::{AgentRoster, SquadAgent};
