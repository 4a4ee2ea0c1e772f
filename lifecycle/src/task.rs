//! Task entity, status machine, and mutation payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task status. Not a strict DAG: `todo` is reachable from any state via
/// re-queue, and `done`/`rejected` are terminal in practice only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the pool.
    Todo,
    /// Actively being worked.
    InProgress,
    /// Stuck behind an external dependency.
    Blocked,
    /// Completed; points settled.
    Done,
    /// Declined before work started.
    Rejected,
}

impl TaskStatus {
    /// Human-readable label used in change notices.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Rejected => "rejected",
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Priority {
    /// Drop everything.
    P1,
    /// Normal urgency.
    #[default]
    P2,
    /// When time allows.
    P3,
}

impl Priority {
    /// Parses a `P1`/`P2`/`P3` token, case-insensitive.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "P1" => Some(Self::P1),
            "P2" => Some(Self::P2),
            "P3" => Some(Self::P3),
            _ => None,
        }
    }

    /// Wire/display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

/// A trackable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier.
    pub id: Uuid,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Owning department.
    pub department_id: Uuid,
    /// User who requested the work.
    pub requester_id: Uuid,
    /// User doing the work; `None` while the task sits in the shared pool.
    pub owner_id: Option<Uuid>,
    /// Points settled to the owner on completion.
    pub score: i64,
    /// Classification category label.
    pub category: String,
    /// Scoring still tracks rule classification; cleared permanently by a
    /// manual score override.
    pub auto_scored: bool,
    /// Points actually credited to the owner on completion. Reversed and
    /// cleared when the task leaves `done`, so a score edit made while the
    /// task sits in `done` cannot skew the ledger.
    #[serde(default)]
    pub settled_score: Option<i64>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// First time the task entered `in_progress`; set at most once.
    pub started_at: Option<DateTime<Utc>>,
    /// Set while status is `done`, cleared on regression away from it.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata, used to link back to the originating message and
    /// channel.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Mutation counter.
    pub revision: u32,
}

/// Fields supplied when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Owning department.
    pub department_id: Uuid,
    /// Priority; defaults to `P2`.
    pub priority: Option<Priority>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Optional initial owner.
    pub owner_id: Option<Uuid>,
    /// Optional initial status; defaults to `todo`.
    pub status: Option<TaskStatus>,
    /// Free-form metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Partial update applied by [`crate::TaskStore::update`]. `owner_id` and
/// `due_date` use a double option so callers can distinguish "leave alone"
/// from "clear".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// Set or clear the owner.
    pub owner_id: Option<Option<Uuid>>,
    /// Manual score override; clears `auto_scored` permanently.
    pub score: Option<i64>,
    /// Manual category override.
    pub category: Option<String>,
    /// Set or clear the due date.
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    /// Patch that only changes status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Activity record attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskComment {
    /// Comment identifier.
    pub id: Uuid,
    /// Task this comment belongs to.
    pub task_id: Uuid,
    /// Commenting user.
    pub author_id: Uuid,
    /// Comment body.
    pub body: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
