//! The task store: creation with auto-scoring, status transitions with
//! timestamp bookkeeping and point settlement, change notices, and fan-out.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crewflow_directory::{ChannelRegistry, MessageLog, NewMessage, UserDirectory};
use crewflow_fanout::{events, Broadcaster, RealtimeEvent};
use crewflow_scoring::RuleBook;

use crate::task::{NewTask, Task, TaskComment, TaskPatch, TaskStatus};
use crate::LifecycleError;

const UNCATEGORIZED: &str = "Uncategorized";
const FALLBACK_NOTICE_CHANNEL: &str = "general";

/// Owner of every task record. Other components reference tasks by id only.
pub struct TaskStore {
    tasks: RwLock<IndexMap<Uuid, Task>>,
    comments: RwLock<Vec<TaskComment>>,
    rules: Arc<RuleBook>,
    users: Arc<UserDirectory>,
    channels: Arc<ChannelRegistry>,
    messages: Arc<MessageLog>,
    bus: Arc<dyn Broadcaster>,
}

impl TaskStore {
    /// Creates an empty store wired to its collaborators.
    #[must_use]
    pub fn new(
        rules: Arc<RuleBook>,
        users: Arc<UserDirectory>,
        channels: Arc<ChannelRegistry>,
        messages: Arc<MessageLog>,
        bus: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            tasks: RwLock::new(IndexMap::new()),
            comments: RwLock::new(Vec::new()),
            rules,
            users,
            channels,
            messages,
            bus,
        }
    }

    /// Creates a task, auto-scoring it from title plus description, and
    /// broadcasts `task_created`.
    pub async fn create(&self, new: NewTask, requester_id: Uuid) -> Result<Task, LifecycleError> {
        let now = Utc::now();
        let classification = self
            .rules
            .classify(&format!("{} {}", new.title, new.description));
        let (score, category) = classification
            .map_or_else(|| (0, UNCATEGORIZED.to_string()), |c| (c.score, c.category));
        let status = new.status.unwrap_or(TaskStatus::Todo);
        let task = Task {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            status,
            priority: new.priority.unwrap_or_default(),
            department_id: new.department_id,
            requester_id,
            owner_id: new.owner_id,
            score,
            category,
            auto_scored: true,
            settled_score: None,
            due_date: new.due_date,
            created_at: now,
            started_at: (status == TaskStatus::InProgress).then_some(now),
            completed_at: (status == TaskStatus::Done).then_some(now),
            updated_at: now,
            metadata: new.metadata,
            revision: 0,
        };
        self.tasks.write().insert(task.id, task.clone());
        self.publish(events::TASK_CREATED, &task).await?;
        Ok(task)
    }

    /// Applies a partial update. Status transitions stamp timestamps, run
    /// late classification where needed, and settle points on the edges into
    /// and out of `done`. A change notice goes to the department channel and
    /// the updated task is broadcast.
    pub async fn update(
        &self,
        id: Uuid,
        patch: TaskPatch,
        actor_id: Uuid,
        comment: Option<&str>,
    ) -> Result<Task, LifecycleError> {
        let now = Utc::now();
        let mut settlement: Option<(Uuid, i64)> = None;
        let mut ownerless_credit = false;

        let (task, changes) = {
            let mut tasks = self.tasks.write();
            let task = tasks.get_mut(&id).ok_or(LifecycleError::NotFound(id))?;
            let mut changes: Vec<String> = Vec::new();
            let mut text_changed = false;

            if let Some(title) = patch.title {
                if title != task.title {
                    changes.push(format!("title \u{2192} \"{title}\""));
                    task.title = title;
                    text_changed = true;
                }
            }
            if let Some(description) = patch.description {
                if description != task.description {
                    changes.push("description updated".to_string());
                    task.description = description;
                    text_changed = true;
                }
            }
            if let Some(priority) = patch.priority {
                if priority != task.priority {
                    changes.push(format!(
                        "priority {} \u{2192} {}",
                        task.priority.label(),
                        priority.label()
                    ));
                    task.priority = priority;
                }
            }
            if let Some(owner) = patch.owner_id {
                if owner != task.owner_id {
                    changes.push(match owner {
                        Some(user) => format!("owner \u{2192} {}", self.display_name(user)),
                        None => "owner cleared".to_string(),
                    });
                    task.owner_id = owner;
                }
            }
            if let Some(due_date) = patch.due_date {
                if due_date != task.due_date {
                    changes.push(match due_date {
                        Some(date) => format!("due {}", date.format("%Y-%m-%d")),
                        None => "due date cleared".to_string(),
                    });
                    task.due_date = due_date;
                }
            }
            if let Some(category) = patch.category {
                if category != task.category {
                    changes.push(format!("category \u{2192} {category}"));
                    task.category = category;
                }
            }
            if let Some(score) = patch.score {
                // Manual override: freeze auto-scoring from here on.
                if score != task.score || task.auto_scored {
                    changes.push(format!("score \u{2192} {score}"));
                }
                task.score = score;
                task.auto_scored = false;
            }

            if text_changed && task.auto_scored {
                match self
                    .rules
                    .classify(&format!("{} {}", task.title, task.description))
                {
                    Some(c) => {
                        task.score = c.score;
                        task.category = c.category;
                    }
                    None => {
                        task.score = 0;
                        task.category = UNCATEGORIZED.to_string();
                    }
                }
            }

            if let Some(next) = patch.status {
                let prev = task.status;
                if next != prev {
                    changes.push(format!("status {} \u{2192} {}", prev.label(), next.label()));
                    task.status = next;
                    if next == TaskStatus::InProgress && task.started_at.is_none() {
                        task.started_at = Some(now);
                    }
                    if next == TaskStatus::Done {
                        task.completed_at = Some(now);
                        // Legacy tasks may reach completion unscored.
                        if task.score == 0 && task.auto_scored {
                            if let Some(c) = self
                                .rules
                                .classify(&format!("{} {}", task.title, task.description))
                            {
                                task.score = c.score;
                                task.category = c.category;
                            }
                        }
                        match task.owner_id {
                            Some(owner) => {
                                settlement = Some((owner, task.score));
                                task.settled_score = Some(task.score);
                            }
                            None => ownerless_credit = true,
                        }
                    } else if prev == TaskStatus::Done {
                        task.completed_at = None;
                        // Reverse exactly what was credited, not the current
                        // score, which may have been edited while done.
                        if let Some(amount) = task.settled_score.take() {
                            if let Some(owner) = task.owner_id {
                                settlement = Some((owner, -amount));
                            }
                        }
                    }
                }
            }

            task.revision += 1;
            task.updated_at = now;
            (task.clone(), changes)
        };

        if let Some((owner, delta)) = settlement {
            if let Err(err) = self.users.adjust_points(owner, delta) {
                warn!(task_id = %task.id, error = %err, "point settlement skipped");
            }
        }
        if ownerless_credit {
            warn!(task_id = %task.id, "task completed without an owner, skipping point credit");
        }

        if let Some(body) = comment {
            self.comments.write().push(TaskComment {
                id: Uuid::new_v4(),
                task_id: task.id,
                author_id: actor_id,
                body: body.to_string(),
                created_at: now,
            });
        }

        if !changes.is_empty() {
            self.post_change_notice(&task, actor_id, &changes).await;
        }
        self.publish(events::TASK_UPDATED, &task).await?;
        Ok(task)
    }

    /// Applies the same status to every id; per-id failures do not stop the
    /// rest.
    pub async fn bulk_status(
        &self,
        ids: &[Uuid],
        status: TaskStatus,
        actor_id: Uuid,
    ) -> Vec<(Uuid, Result<Task, LifecycleError>)> {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let result = self
                .update(id, TaskPatch::status(status), actor_id, None)
                .await;
            results.push((id, result));
        }
        results
    }

    /// Hard-deletes a task and its comments and broadcasts `task_deleted`.
    /// Points already settled stay settled.
    pub async fn remove(&self, id: Uuid, reason: Option<&str>) -> Result<(), LifecycleError> {
        let task = self
            .tasks
            .write()
            .shift_remove(&id)
            .ok_or(LifecycleError::NotFound(id))?;
        self.comments.write().retain(|comment| comment.task_id != id);
        info!(task_id = %id, reason = reason.unwrap_or("none"), "task removed");
        self.publish(events::TASK_DELETED, &task).await?;
        Ok(())
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().get(&id).cloned()
    }

    /// All tasks in creation order.
    #[must_use]
    pub fn all(&self) -> Vec<Task> {
        self.tasks.read().values().cloned().collect()
    }

    /// Most recent tasks for a department, newest last.
    #[must_use]
    pub fn recent_for_department(&self, department_id: Uuid, limit: usize) -> Vec<Task> {
        let tasks = self.tasks.read();
        let mut recent: Vec<Task> = tasks
            .values()
            .filter(|task| task.department_id == department_id)
            .cloned()
            .collect();
        let skip = recent.len().saturating_sub(limit);
        recent.drain(..skip);
        recent
    }

    /// Activity records for a task, oldest first.
    #[must_use]
    pub fn comments_for(&self, task_id: Uuid) -> Vec<TaskComment> {
        self.comments
            .read()
            .iter()
            .filter(|comment| comment.task_id == task_id)
            .cloned()
            .collect()
    }

    fn display_name(&self, user_id: Uuid) -> String {
        self.users
            .get(user_id)
            .map_or_else(|| "someone".to_string(), |user| user.display_name)
    }

    /// Best-effort human-readable notice to the task's department channel,
    /// falling back to the default channel. Failures are logged and
    /// swallowed; they never fail the triggering mutation.
    async fn post_change_notice(&self, task: &Task, actor_id: Uuid, changes: &[String]) {
        let channel = self
            .channels
            .for_department(task.department_id)
            .or_else(|| self.channels.by_name(FALLBACK_NOTICE_CHANNEL));
        let Some(channel) = channel else {
            warn!(task_id = %task.id, "no channel available for change notice");
            return;
        };
        let content = format!(
            "Task \"{}\" updated by {}: {}",
            task.title,
            self.display_name(actor_id),
            changes.join(", ")
        );
        if let Err(err) = self
            .messages
            .append(NewMessage::system(channel.id, content))
            .await
        {
            warn!(task_id = %task.id, error = %err, "change notice post failed");
        }
    }

    async fn publish(&self, event: &str, task: &Task) -> Result<(), LifecycleError> {
        let payload = serde_json::to_value(task).map_err(anyhow::Error::from)?;
        self.bus
            .publish(RealtimeEvent::new(event, payload))
            .await
            .map_err(LifecycleError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use crewflow_directory::{ChannelKind, DepartmentRegistry};
    use crewflow_fanout::MemoryBroadcaster;
    use crewflow_scoring::{MatchMode, ScoringRule};
    use indexmap::IndexSet;

    struct Fixture {
        bus: Arc<MemoryBroadcaster>,
        users: Arc<UserDirectory>,
        rules: Arc<RuleBook>,
        store: TaskStore,
        department_id: Uuid,
        requester: Uuid,
        owner: Uuid,
    }

    fn bug_rule() -> ScoringRule {
        ScoringRule {
            id: Uuid::new_v4(),
            keyword: "bug".to_string(),
            mode: MatchMode::Contains,
            score: 8,
            category: "Defect".to_string(),
        }
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBroadcaster::new(128));
        let users = Arc::new(UserDirectory::new());
        let departments = DepartmentRegistry::new();
        let department_id = departments.create("Platform").id;
        let channels = Arc::new(ChannelRegistry::new(bus.clone()));
        channels
            .create("general", ChannelKind::General, None, IndexSet::new())
            .await
            .unwrap();
        channels
            .create(
                "platform",
                ChannelKind::Department,
                Some(department_id),
                IndexSet::new(),
            )
            .await
            .unwrap();
        let messages = Arc::new(MessageLog::new(bus.clone()));
        let rules = Arc::new(RuleBook::empty());
        rules.upsert(bug_rule());
        let requester = users.create_user("rita", "Rita", false).id;
        let owner = users.create_user("omar", "Omar", false).id;
        let store = TaskStore::new(
            rules.clone(),
            users.clone(),
            channels,
            messages,
            bus.clone(),
        );
        Fixture {
            bus,
            users,
            rules,
            store,
            department_id,
            requester,
            owner,
        }
    }

    fn new_task(fx: &Fixture, title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: String::new(),
            department_id: fx.department_id,
            owner_id: Some(fx.owner),
            ..NewTask::default()
        }
    }

    #[tokio::test]
    async fn create_auto_scores_matching_text() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "fix checkout bug"), fx.requester)
            .await
            .unwrap();
        assert_eq!(task.score, 8);
        assert_eq!(task.category, "Defect");
        assert!(task.auto_scored);
        assert_eq!(fx.bus.named(events::TASK_CREATED).len(), 1);
    }

    #[tokio::test]
    async fn create_without_match_is_uncategorized() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "water the plants"), fx.requester)
            .await
            .unwrap();
        assert_eq!(task.score, 0);
        assert_eq!(task.category, "Uncategorized");
    }

    #[tokio::test]
    async fn started_at_is_stamped_exactly_once() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "bug triage"), fx.requester)
            .await
            .unwrap();
        let first = fx
            .store
            .update(
                task.id,
                TaskPatch::status(TaskStatus::InProgress),
                fx.owner,
                None,
            )
            .await
            .unwrap();
        let stamp = first.started_at.unwrap();
        fx.store
            .update(task.id, TaskPatch::status(TaskStatus::Blocked), fx.owner, None)
            .await
            .unwrap();
        let again = fx
            .store
            .update(
                task.id,
                TaskPatch::status(TaskStatus::InProgress),
                fx.owner,
                None,
            )
            .await
            .unwrap();
        assert_eq!(again.started_at.unwrap(), stamp);
    }

    #[tokio::test]
    async fn completed_at_tracks_done_symmetrically() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "bug fix"), fx.requester)
            .await
            .unwrap();
        let done = fx
            .store
            .update(task.id, TaskPatch::status(TaskStatus::Done), fx.owner, None)
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        let requeued = fx
            .store
            .update(task.id, TaskPatch::status(TaskStatus::Todo), fx.owner, None)
            .await
            .unwrap();
        assert!(requeued.completed_at.is_none());
    }

    #[tokio::test]
    async fn settlement_is_symmetric_and_edge_triggered() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "payments bug"), fx.requester)
            .await
            .unwrap();
        fx.store
            .update(task.id, TaskPatch::status(TaskStatus::Done), fx.owner, None)
            .await
            .unwrap();
        assert_eq!(fx.users.points(fx.owner).unwrap(), 8);

        // Same status again: no transition, no settlement.
        fx.store
            .update(task.id, TaskPatch::status(TaskStatus::Done), fx.owner, None)
            .await
            .unwrap();
        assert_eq!(fx.users.points(fx.owner).unwrap(), 8);

        fx.store
            .update(task.id, TaskPatch::status(TaskStatus::Todo), fx.owner, None)
            .await
            .unwrap();
        assert_eq!(fx.users.points(fx.owner).unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_after_override_reverses_the_credited_amount() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "invoice bug"), fx.requester)
            .await
            .unwrap();
        fx.store
            .update(task.id, TaskPatch::status(TaskStatus::Done), fx.owner, None)
            .await
            .unwrap();
        assert_eq!(fx.users.points(fx.owner).unwrap(), 8);

        // Score edited while the task sits in done.
        fx.store
            .update(
                task.id,
                TaskPatch {
                    score: Some(0),
                    ..TaskPatch::default()
                },
                fx.requester,
                None,
            )
            .await
            .unwrap();

        let requeued = fx
            .store
            .update(task.id, TaskPatch::status(TaskStatus::Todo), fx.owner, None)
            .await
            .unwrap();
        assert_eq!(requeued.settled_score, None);
        assert_eq!(fx.users.points(fx.owner).unwrap(), 0);
    }

    #[tokio::test]
    async fn ownerless_completion_skips_credit_without_failing() {
        let fx = fixture().await;
        let mut new = new_task(&fx, "stray bug");
        new.owner_id = None;
        let task = fx.store.create(new, fx.requester).await.unwrap();
        let done = fx
            .store
            .update(task.id, TaskPatch::status(TaskStatus::Done), fx.requester, None)
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(fx.users.points(fx.owner).unwrap(), 0);
    }

    #[tokio::test]
    async fn manual_score_override_freezes_auto_scoring() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "bug report"), fx.requester)
            .await
            .unwrap();
        let patched = fx
            .store
            .update(
                task.id,
                TaskPatch {
                    score: Some(42),
                    ..TaskPatch::default()
                },
                fx.requester,
                None,
            )
            .await
            .unwrap();
        assert!(!patched.auto_scored);
        let retitled = fx
            .store
            .update(
                task.id,
                TaskPatch {
                    title: Some("still a bug somewhere".to_string()),
                    ..TaskPatch::default()
                },
                fx.requester,
                None,
            )
            .await
            .unwrap();
        assert_eq!(retitled.score, 42);
    }

    #[tokio::test]
    async fn retitling_an_auto_scored_task_rescores_it() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "water the plants"), fx.requester)
            .await
            .unwrap();
        let retitled = fx
            .store
            .update(
                task.id,
                TaskPatch {
                    title: Some("bug in the sprinkler".to_string()),
                    ..TaskPatch::default()
                },
                fx.requester,
                None,
            )
            .await
            .unwrap();
        assert_eq!(retitled.score, 8);
        assert_eq!(retitled.category, "Defect");
    }

    #[tokio::test]
    async fn completing_a_zero_score_task_runs_late_classification() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "mystery work"), fx.requester)
            .await
            .unwrap();
        assert_eq!(task.score, 0);
        // Rules changed after creation; completion re-evaluates.
        fx.rules.upsert(ScoringRule {
            id: Uuid::new_v4(),
            keyword: "mystery".to_string(),
            mode: MatchMode::Contains,
            score: 5,
            category: "Research".to_string(),
        });
        let done = fx
            .store
            .update(task.id, TaskPatch::status(TaskStatus::Done), fx.owner, None)
            .await
            .unwrap();
        assert_eq!(done.score, 5);
        assert_eq!(done.category, "Research");
        assert_eq!(fx.users.points(fx.owner).unwrap(), 5);
    }

    #[tokio::test]
    async fn remove_deletes_but_keeps_settled_points() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "billing bug"), fx.requester)
            .await
            .unwrap();
        fx.store
            .update(task.id, TaskPatch::status(TaskStatus::Done), fx.owner, None)
            .await
            .unwrap();
        fx.store.remove(task.id, Some("cleanup")).await.unwrap();
        assert!(fx.store.get(task.id).is_none());
        assert_eq!(fx.users.points(fx.owner).unwrap(), 8);
        assert_eq!(fx.bus.named(events::TASK_DELETED).len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_loud() {
        let fx = fixture().await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            fx.store
                .update(missing, TaskPatch::default(), fx.requester, None)
                .await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(
            fx.store.remove(missing, None).await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn change_notice_lands_in_department_channel() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "bug in exports"), fx.requester)
            .await
            .unwrap();
        fx.store
            .update(
                task.id,
                TaskPatch {
                    priority: Some(Priority::P1),
                    ..TaskPatch::default()
                },
                fx.requester,
                None,
            )
            .await
            .unwrap();
        let notices = fx.bus.named(events::MESSAGE);
        assert_eq!(notices.len(), 1);
        let content = notices[0].payload["content"].as_str().unwrap();
        assert!(content.contains("priority P2 \u{2192} P1"), "{content}");
        assert!(content.contains("Rita"));
    }

    #[tokio::test]
    async fn bulk_status_collects_per_id_results() {
        let fx = fixture().await;
        let a = fx
            .store
            .create(new_task(&fx, "bug one"), fx.requester)
            .await
            .unwrap();
        let missing = Uuid::new_v4();
        let results = fx
            .store
            .bulk_status(&[a.id, missing], TaskStatus::InProgress, fx.owner)
            .await;
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }

    #[tokio::test]
    async fn comments_are_recorded_and_removed_with_the_task() {
        let fx = fixture().await;
        let task = fx
            .store
            .create(new_task(&fx, "bug hunt"), fx.requester)
            .await
            .unwrap();
        fx.store
            .update(
                task.id,
                TaskPatch::status(TaskStatus::InProgress),
                fx.owner,
                Some("on it"),
            )
            .await
            .unwrap();
        assert_eq!(fx.store.comments_for(task.id).len(), 1);
        fx.store.remove(task.id, Some("cleanup")).await.unwrap();
        assert!(fx.store.comments_for(task.id).is_empty());
    }
}
