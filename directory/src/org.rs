//! Departments and chat channels.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crewflow_fanout::{events, Broadcaster, RealtimeEvent};

use crate::DirectoryError;

/// A team that owns tasks and may have a squad agent bound to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    /// Department identifier.
    pub id: Uuid,
    /// Team name.
    pub name: String,
}

/// Department store. `General` is seeded at construction and acts as the
/// last-resort team for tasks that cannot be routed anywhere else.
#[derive(Debug)]
pub struct DepartmentRegistry {
    departments: RwLock<IndexMap<Uuid, Department>>,
    general_id: Uuid,
}

impl Default for DepartmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DepartmentRegistry {
    /// Creates a registry with the `General` department seeded.
    #[must_use]
    pub fn new() -> Self {
        let general = Department {
            id: Uuid::new_v4(),
            name: "General".to_string(),
        };
        let general_id = general.id;
        let mut departments = IndexMap::new();
        departments.insert(general.id, general);
        Self {
            departments: RwLock::new(departments),
            general_id,
        }
    }

    /// Id of the seeded `General` department.
    #[must_use]
    pub const fn general_id(&self) -> Uuid {
        self.general_id
    }

    /// Creates a department with the given name.
    pub fn create(&self, name: impl Into<String>) -> Department {
        let department = Department {
            id: Uuid::new_v4(),
            name: name.into(),
        };
        self.departments
            .write()
            .insert(department.id, department.clone());
        department
    }

    /// Looks up a department by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Department> {
        self.departments.read().get(&id).cloned()
    }

    /// Case-insensitive lookup by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Department> {
        self.departments
            .read()
            .values()
            .find(|department| department.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Returns the department with the given name, creating it when absent.
    pub fn find_or_create(&self, name: &str) -> Department {
        if let Some(found) = self.by_name(name) {
            return found;
        }
        self.create(name)
    }
}

/// Channel visibility/purpose class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Open to everyone.
    General,
    /// Mirrors a department; its name doubles as the team name.
    Department,
    /// Ad-hoc member list.
    Group,
    /// Restricted member list.
    Private,
}

/// A named message container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier.
    pub id: Uuid,
    /// Channel name.
    pub name: String,
    /// Visibility class.
    pub kind: ChannelKind,
    /// Optional linked department used to route tasks created from this
    /// channel's messages.
    pub department_id: Option<Uuid>,
    /// Members, meaningful for group/private channels.
    pub members: IndexSet<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Whether the sender may post here. System messages carry no sender and
    /// always pass; admins are exempt from membership checks.
    #[must_use]
    pub fn allows_post(&self, sender: Option<Uuid>, is_admin: bool) -> bool {
        let Some(sender) = sender else { return true };
        match self.kind {
            ChannelKind::General | ChannelKind::Department => true,
            ChannelKind::Group | ChannelKind::Private => {
                is_admin || self.members.contains(&sender)
            }
        }
    }
}

/// Channel store. Mutations broadcast channel-lifecycle events.
pub struct ChannelRegistry {
    channels: RwLock<IndexMap<Uuid, Channel>>,
    bus: Arc<dyn Broadcaster>,
}

impl ChannelRegistry {
    /// Creates an empty registry publishing on the given bus.
    #[must_use]
    pub fn new(bus: Arc<dyn Broadcaster>) -> Self {
        Self {
            channels: RwLock::new(IndexMap::new()),
            bus,
        }
    }

    /// Creates a channel and broadcasts `channel_created`.
    pub async fn create(
        &self,
        name: impl Into<String>,
        kind: ChannelKind,
        department_id: Option<Uuid>,
        members: IndexSet<Uuid>,
    ) -> Result<Channel> {
        let channel = Channel {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            department_id,
            members,
            created_at: Utc::now(),
        };
        self.channels.write().insert(channel.id, channel.clone());
        self.bus
            .publish(RealtimeEvent::new(
                events::CHANNEL_CREATED,
                serde_json::to_value(&channel)?,
            ))
            .await?;
        Ok(channel)
    }

    /// Links (or re-links) a channel to a department and broadcasts
    /// `channel_updated`.
    pub async fn link_department(
        &self,
        channel_id: Uuid,
        department_id: Uuid,
    ) -> Result<Channel, DirectoryError> {
        let channel = {
            let mut channels = self.channels.write();
            let channel = channels
                .get_mut(&channel_id)
                .ok_or(DirectoryError::ChannelNotFound(channel_id))?;
            channel.department_id = Some(department_id);
            channel.clone()
        };
        self.publish_update(&channel).await;
        Ok(channel)
    }

    /// Adds a member and broadcasts `channel_updated`.
    pub async fn add_member(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Channel, DirectoryError> {
        let channel = {
            let mut channels = self.channels.write();
            let channel = channels
                .get_mut(&channel_id)
                .ok_or(DirectoryError::ChannelNotFound(channel_id))?;
            channel.members.insert(user_id);
            channel.clone()
        };
        self.publish_update(&channel).await;
        Ok(channel)
    }

    /// Removes a channel and broadcasts `channel_deleted`.
    pub async fn remove(&self, channel_id: Uuid) -> Result<(), DirectoryError> {
        let channel = self
            .channels
            .write()
            .shift_remove(&channel_id)
            .ok_or(DirectoryError::ChannelNotFound(channel_id))?;
        if let Ok(payload) = serde_json::to_value(&channel) {
            let _ = self
                .bus
                .publish(RealtimeEvent::new(events::CHANNEL_DELETED, payload))
                .await;
        }
        Ok(())
    }

    /// Looks up a channel by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Channel> {
        self.channels.read().get(&id).cloned()
    }

    /// Case-insensitive lookup by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Channel> {
        self.channels
            .read()
            .values()
            .find(|channel| channel.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// First channel linked to the given department.
    #[must_use]
    pub fn for_department(&self, department_id: Uuid) -> Option<Channel> {
        self.channels
            .read()
            .values()
            .find(|channel| channel.department_id == Some(department_id))
            .cloned()
    }

    async fn publish_update(&self, channel: &Channel) {
        if let Ok(payload) = serde_json::to_value(channel) {
            let _ = self
                .bus
                .publish(RealtimeEvent::new(events::CHANNEL_UPDATED, payload))
                .await;
        }
    }
}
