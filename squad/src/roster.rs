//! Per-team agent configuration, keyed uniquely by department id.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crewflow_directory::UserDirectory;

/// One automated commentator bound 1:1 to a department.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadAgent {
    /// Department this agent speaks for; also its roster key.
    pub department_id: Uuid,
    /// Chat display name; the handle participants use to address it.
    pub display_name: String,
    /// Persona tag steering the tone of generated commentary.
    pub persona: String,
    /// Free-form operator instructions appended to every generation.
    pub instructions: String,
    /// Inactive agents never post.
    pub active: bool,
    /// Lifecycle event names this agent reacts to.
    pub triggers: IndexSet<String>,
}

/// Agent configuration store. Every upsert re-synchronizes the agent's
/// chat-visible identity so it stays @-mentionable.
pub struct AgentRoster {
    agents: RwLock<IndexMap<Uuid, SquadAgent>>,
    users: Arc<UserDirectory>,
}

impl AgentRoster {
    /// Creates an empty roster syncing identities into the given directory.
    #[must_use]
    pub fn new(users: Arc<UserDirectory>) -> Self {
        Self {
            agents: RwLock::new(IndexMap::new()),
            users,
        }
    }

    /// Inserts or replaces the agent for its department and syncs the chat
    /// identity. Returns the identity's user id.
    pub fn upsert(&self, agent: SquadAgent) -> Uuid {
        let identity = self
            .users
            .sync_agent_identity(agent.department_id, agent.display_name.clone());
        self.agents.write().insert(agent.department_id, agent);
        identity
    }

    /// Agent bound to the department, if configured.
    #[must_use]
    pub fn get(&self, department_id: Uuid) -> Option<SquadAgent> {
        self.agents.read().get(&department_id).cloned()
    }

    /// All configured agents.
    #[must_use]
    pub fn all(&self) -> Vec<SquadAgent> {
        self.agents.read().values().cloned().collect()
    }

    /// Active agent whose display name starts the given text.
    #[must_use]
    pub fn match_prefix(&self, text: &str) -> Option<SquadAgent> {
        let lowered = text.trim_start().to_lowercase();
        self.agents
            .read()
            .values()
            .find(|agent| agent.active && lowered.starts_with(&agent.display_name.to_lowercase()))
            .cloned()
    }

    /// Active agent whose display name appears anywhere in the text.
    #[must_use]
    pub fn match_mention(&self, text: &str) -> Option<SquadAgent> {
        let lowered = text.to_lowercase();
        self.agents
            .read()
            .values()
            .find(|agent| agent.active && lowered.contains(&agent.display_name.to_lowercase()))
            .cloned()
    }
}
