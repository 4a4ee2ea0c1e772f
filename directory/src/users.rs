//! User accounts and the per-user point ledger.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DirectoryError;

/// A platform participant. Squad agents are synchronized into this store so
/// they can be @-mentioned like any other participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: Uuid,
    /// Unique login/mention handle.
    pub username: String,
    /// Display name shown in chat.
    pub display_name: String,
    /// Running point ledger credited on completed, scored work.
    pub points: i64,
    /// Administrators bypass channel membership checks.
    pub is_admin: bool,
    /// Synthetic identity owned by a squad agent.
    pub is_agent: bool,
    /// Account creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Thread-safe user store. Point mutations go through [`UserDirectory::adjust_points`]
/// so the ledger is updated in a single atomic step under the write lock.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<IndexMap<Uuid, User>>,
    agent_identities: RwLock<IndexMap<Uuid, Uuid>>,
}

impl UserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new human user.
    pub fn create_user(
        &self,
        username: impl Into<String>,
        display_name: impl Into<String>,
        is_admin: bool,
    ) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.into(),
            display_name: display_name.into(),
            points: 0,
            is_admin,
            is_agent: false,
            created_at: Utc::now(),
        };
        self.users.write().insert(user.id, user.clone());
        user
    }

    /// Looks up a user by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.read().get(&id).cloned()
    }

    /// Looks up a user by mention handle.
    #[must_use]
    pub fn by_username(&self, username: &str) -> Option<User> {
        self.users
            .read()
            .values()
            .find(|user| user.username.eq_ignore_ascii_case(username))
            .cloned()
    }

    /// Whether the user holds admin rights. Unknown users are not admins.
    #[must_use]
    pub fn is_admin(&self, id: Uuid) -> bool {
        self.users.read().get(&id).is_some_and(|user| user.is_admin)
    }

    /// Atomically adjusts the point ledger and returns the new balance.
    pub fn adjust_points(&self, id: Uuid, delta: i64) -> Result<i64, DirectoryError> {
        let mut users = self.users.write();
        let user = users
            .get_mut(&id)
            .ok_or(DirectoryError::UserNotFound(id))?;
        user.points = user.points.saturating_add(delta);
        Ok(user.points)
    }

    /// Current ledger balance.
    pub fn points(&self, id: Uuid) -> Result<i64, DirectoryError> {
        self.users
            .read()
            .get(&id)
            .map(|user| user.points)
            .ok_or(DirectoryError::UserNotFound(id))
    }

    /// Idempotent upsert of the chat identity for the agent bound to a
    /// department. Returns the identity's user id. Re-running with a new
    /// display name renames the existing identity in place.
    pub fn sync_agent_identity(
        &self,
        department_id: Uuid,
        display_name: impl Into<String>,
    ) -> Uuid {
        let display_name = display_name.into();
        let mut identities = self.agent_identities.write();
        if let Some(user_id) = identities.get(&department_id).copied() {
            let mut users = self.users.write();
            if let Some(user) = users.get_mut(&user_id) {
                user.display_name.clone_from(&display_name);
                user.username = mention_handle(&display_name);
                return user_id;
            }
        }
        let user = User {
            id: Uuid::new_v4(),
            username: mention_handle(&display_name),
            display_name,
            points: 0,
            is_admin: false,
            is_agent: true,
            created_at: Utc::now(),
        };
        let user_id = user.id;
        self.users.write().insert(user_id, user);
        identities.insert(department_id, user_id);
        user_id
    }

    /// Chat identity for the department's agent, if one was synchronized.
    #[must_use]
    pub fn agent_identity(&self, department_id: Uuid) -> Option<Uuid> {
        self.agent_identities.read().get(&department_id).copied()
    }
}

fn mention_handle(display_name: &str) -> String {
    display_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_adjustments_accumulate() {
        let directory = UserDirectory::new();
        let user = directory.create_user("maya", "Maya", false);
        directory.adjust_points(user.id, 8).unwrap();
        directory.adjust_points(user.id, -3).unwrap();
        assert_eq!(directory.points(user.id).unwrap(), 5);
    }

    #[test]
    fn adjusting_unknown_user_fails() {
        let directory = UserDirectory::new();
        assert!(directory.adjust_points(Uuid::new_v4(), 1).is_err());
    }

    #[test]
    fn agent_identity_sync_is_idempotent() {
        let directory = UserDirectory::new();
        let department = Uuid::new_v4();
        let first = directory.sync_agent_identity(department, "Ops Bot");
        let second = directory.sync_agent_identity(department, "Ops Bot Mk2");
        assert_eq!(first, second);
        let user = directory.get(first).unwrap();
        assert!(user.is_agent);
        assert_eq!(user.display_name, "Ops Bot Mk2");
        assert_eq!(user.username, "opsbotmk2");
    }
}
