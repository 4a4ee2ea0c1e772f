//! Event-triggered commentary and the direct/mention reply paths.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crewflow_directory::{ChannelRegistry, MessageLog, NewMessage, UserDirectory};
use crewflow_fanout::{events, MemoryBroadcaster};
use crewflow_genai::ExtractionClient;
use crewflow_lifecycle::{Task, TaskStore};

use crate::roster::{AgentRoster, SquadAgent};

const FALLBACK_CHANNEL: &str = "general";
const RECENT_TASK_CONTEXT: usize = 5;

/// Routes lifecycle events and direct questions to the right agent and posts
/// the generated commentary. Every failure path here is silent: commentary
/// must never fail the mutation that triggered it.
pub struct SquadDispatcher {
    roster: Arc<AgentRoster>,
    extraction: Arc<ExtractionClient>,
    users: Arc<UserDirectory>,
    channels: Arc<ChannelRegistry>,
    messages: Arc<MessageLog>,
    tasks: Arc<TaskStore>,
}

impl SquadDispatcher {
    /// Creates a dispatcher wired to its collaborators.
    #[must_use]
    pub fn new(
        roster: Arc<AgentRoster>,
        extraction: Arc<ExtractionClient>,
        users: Arc<UserDirectory>,
        channels: Arc<ChannelRegistry>,
        messages: Arc<MessageLog>,
        tasks: Arc<TaskStore>,
    ) -> Self {
        Self {
            roster,
            extraction,
            users,
            channels,
            messages,
            tasks,
        }
    }

    /// Shared roster handle.
    #[must_use]
    pub fn roster(&self) -> Arc<AgentRoster> {
        Arc::clone(&self.roster)
    }

    /// Reacts to a task lifecycle event. Missing/inactive agent or an event
    /// outside the agent's trigger set is a silent no-op.
    pub async fn on_task_event(&self, event_name: &str, task: &Task) {
        let Some(agent) = self.roster.get(task.department_id) else {
            return;
        };
        if !agent.active || !agent.triggers.contains(event_name) {
            debug!(event_name, agent = %agent.display_name, "event outside trigger set");
            return;
        }
        let context = self.task_context(task);
        let commentary = self
            .extraction
            .generate_commentary(
                &agent.persona,
                persona_hint(&agent.persona),
                &context,
                event_name,
                Some(&agent.instructions),
            )
            .await;
        if commentary.is_empty() {
            return;
        }
        let Some(channel) = self
            .channels
            .for_department(task.department_id)
            .or_else(|| self.channels.by_name(FALLBACK_CHANNEL))
        else {
            warn!(task_id = %task.id, "no channel for agent commentary");
            return;
        };
        self.post_as_agent(&agent, channel.id, commentary).await;
    }

    /// Direct-address path: a participant opened a message with the agent's
    /// name. Posts an immediate placeholder, gathers recent task context for
    /// the team, then posts the generated reply. The two posts are not
    /// atomic; an empty generation leaves only the placeholder.
    pub async fn respond_direct(&self, agent: &SquadAgent, channel_id: Uuid, question: &str) {
        self.post_as_agent(
            agent,
            channel_id,
            format!("{} is analyzing\u{2026}", agent.display_name),
        )
        .await;

        let recent = self
            .tasks
            .recent_for_department(agent.department_id, RECENT_TASK_CONTEXT);
        let mut context = String::from("Recent team tasks:\n");
        if recent.is_empty() {
            context.push_str("(none)\n");
        }
        for task in &recent {
            context.push_str(&format!(
                "- [{}] {} ({})\n",
                task.status.label(),
                task.title,
                task.priority.label()
            ));
        }
        context.push_str(&format!("Question: {question}"));

        let reply = self
            .extraction
            .generate_commentary(
                &agent.persona,
                persona_hint(&agent.persona),
                &context,
                "direct_query",
                Some(&agent.instructions),
            )
            .await;
        if !reply.is_empty() {
            self.post_as_agent(agent, channel_id, reply).await;
        }
    }

    /// Mention path: the agent's name appeared mid-text. Lower precedence
    /// and lighter context than the direct path; never creates tasks.
    pub async fn respond_mention(&self, agent: &SquadAgent, channel_id: Uuid, content: &str) {
        let context = format!("A teammate mentioned you in chat: {content}");
        let reply = self
            .extraction
            .generate_commentary(
                &agent.persona,
                persona_hint(&agent.persona),
                &context,
                "mentioned",
                Some(&agent.instructions),
            )
            .await;
        if !reply.is_empty() {
            self.post_as_agent(agent, channel_id, reply).await;
        }
    }

    /// Subscribes to the fan-out bus and feeds task lifecycle events to
    /// [`Self::on_task_event`] until the bus closes.
    pub fn spawn_event_loop(self: &Arc<Self>, bus: &MemoryBroadcaster) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let name = event.event.as_str();
                        if name != events::TASK_CREATED
                            && name != events::TASK_UPDATED
                            && name != events::TASK_DELETED
                        {
                            continue;
                        }
                        match serde_json::from_value::<Task>(event.payload.clone()) {
                            Ok(task) => dispatcher.on_task_event(name, &task).await,
                            Err(err) => {
                                warn!(error = %err, event = name, "undecodable task payload");
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "agent event loop lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Task context for generation. Requester and owner are labelled
    /// explicitly so commentary never implies the requester does the work.
    fn task_context(&self, task: &Task) -> String {
        let requester = self.display_name(Some(task.requester_id));
        let owner = self.display_name(task.owner_id);
        format!(
            "Task: {}\nDescription: {}\nPriority: {}\nStatus: {}\n\
Requester (asked for this): {requester}\nOwner (doing the work): {owner}",
            task.title,
            task.description,
            task.priority.label(),
            task.status.label(),
        )
    }

    fn display_name(&self, user_id: Option<Uuid>) -> String {
        user_id
            .and_then(|id| self.users.get(id))
            .map_or_else(|| "unassigned".to_string(), |user| user.display_name)
    }

    async fn post_as_agent(&self, agent: &SquadAgent, channel_id: Uuid, content: String) {
        let sender_id = self.users.agent_identity(agent.department_id);
        let message = NewMessage {
            channel_id,
            sender_id,
            content,
            ..NewMessage::default()
        };
        if let Err(err) = self.messages.append(message).await {
            warn!(agent = %agent.display_name, error = %err, "agent post failed");
        }
    }
}

fn persona_hint(persona: &str) -> &'static str {
    match persona.to_lowercase().as_str() {
        "coach" => "Encourage the team and celebrate progress.",
        "analyst" => "Be precise and lead with the concrete facts you see.",
        "sergeant" => "Be blunt and push for immediate next steps.",
        _ => "Be helpful and concise.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewflow_directory::ChannelKind;
    use crewflow_genai::{CannedGenerator, RetryPolicy};
    use crewflow_lifecycle::NewTask;
    use crewflow_scoring::RuleBook;
    use indexmap::IndexSet;
    use std::time::Duration;

    struct Fixture {
        bus: Arc<MemoryBroadcaster>,
        generator: Arc<CannedGenerator>,
        dispatcher: Arc<SquadDispatcher>,
        tasks: Arc<TaskStore>,
        department_id: Uuid,
        channel_id: Uuid,
        requester: Uuid,
    }

    async fn fixture(replies: &[&str], triggers: &[&str]) -> Fixture {
        let bus = Arc::new(MemoryBroadcaster::new(128));
        let users = Arc::new(UserDirectory::new());
        let channels = Arc::new(ChannelRegistry::new(bus.clone()));
        let messages = Arc::new(MessageLog::new(bus.clone()));
        let rules = Arc::new(RuleBook::empty());
        let department_id = Uuid::new_v4();
        let channel = channels
            .create(
                "platform",
                ChannelKind::Department,
                Some(department_id),
                IndexSet::new(),
            )
            .await
            .unwrap();
        let generator = Arc::new(CannedGenerator::scripted(replies.iter().copied()));
        let extraction = Arc::new(
            ExtractionClient::new(generator.clone() as Arc<dyn crewflow_genai::TextGenerator>)
                .with_policy(RetryPolicy::immediate()),
        );
        let tasks = Arc::new(TaskStore::new(
            rules,
            users.clone(),
            channels.clone(),
            messages.clone(),
            bus.clone(),
        ));
        let roster = Arc::new(AgentRoster::new(users.clone()));
        roster.upsert(SquadAgent {
            department_id,
            display_name: "Scout".to_string(),
            persona: "analyst".to_string(),
            instructions: "Track the platform team.".to_string(),
            active: true,
            triggers: triggers.iter().map(ToString::to_string).collect(),
        });
        let requester = users.create_user("rita", "Rita", false).id;
        let dispatcher = Arc::new(SquadDispatcher::new(
            roster,
            extraction,
            users,
            channels,
            messages,
            tasks.clone(),
        ));
        Fixture {
            bus,
            generator,
            dispatcher,
            tasks,
            department_id,
            channel_id: channel.id,
            requester,
        }
    }

    async fn sample_task(fx: &Fixture) -> Task {
        fx.tasks
            .create(
                NewTask {
                    title: "Ship exports".to_string(),
                    description: "CSV exports for billing".to_string(),
                    department_id: fx.department_id,
                    ..NewTask::default()
                },
                fx.requester,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn triggered_event_posts_commentary_as_the_agent() {
        let fx = fixture(&["On it: exports are queued."], &["task_created"]).await;
        let task = sample_task(&fx).await;
        let before = fx.bus.named(events::MESSAGE).len();
        fx.dispatcher.on_task_event("task_created", &task).await;
        let posts = fx.bus.named(events::MESSAGE);
        assert_eq!(posts.len(), before + 1);
        let last = posts.last().unwrap();
        assert_eq!(last.payload["content"], "On it: exports are queued.");
        assert!(!last.payload["sender_id"].is_null());
    }

    #[tokio::test]
    async fn untriggered_event_is_silent() {
        let fx = fixture(&["should never appear"], &["task_created"]).await;
        let task = sample_task(&fx).await;
        fx.dispatcher.on_task_event("task_updated", &task).await;
        assert_eq!(fx.generator.calls(), 0);
    }

    #[tokio::test]
    async fn empty_commentary_is_not_posted() {
        let fx = fixture(&[""], &["task_created"]).await;
        let task = sample_task(&fx).await;
        let before = fx.bus.named(events::MESSAGE).len();
        fx.dispatcher.on_task_event("task_created", &task).await;
        assert_eq!(fx.generator.calls(), 1);
        assert_eq!(fx.bus.named(events::MESSAGE).len(), before);
    }

    #[tokio::test]
    async fn direct_reply_posts_placeholder_then_answer() {
        let fx = fixture(&["Two open items, both on track."], &["task_created"]).await;
        sample_task(&fx).await;
        let agent = fx.dispatcher.roster().get(fx.department_id).unwrap();
        fx.dispatcher
            .respond_direct(&agent, fx.channel_id, "what's pending?")
            .await;
        let posts = fx.bus.named(events::MESSAGE);
        let agent_posts: Vec<_> = posts
            .iter()
            .filter(|post| !post.payload["sender_id"].is_null())
            .collect();
        assert_eq!(agent_posts.len(), 2);
        assert!(agent_posts[0].payload["content"]
            .as_str()
            .unwrap()
            .contains("analyzing"));
        assert_eq!(
            agent_posts[1].payload["content"],
            "Two open items, both on track."
        );
    }

    #[tokio::test]
    async fn event_loop_reacts_to_bus_traffic() {
        let fx = fixture(&["Noted."], &["task_created"]).await;
        let handle = fx.dispatcher.spawn_event_loop(&fx.bus);
        let task = sample_task(&fx).await;
        // create() already published task_created; wait for the loop to post.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let posted = fx
                .bus
                .named(events::MESSAGE)
                .iter()
                .any(|post| post.payload["content"] == "Noted.");
            if posted {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "no commentary seen");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _ = task;
        handle.abort();
    }

    #[tokio::test]
    async fn task_context_labels_requester_and_owner() {
        let fx = fixture(&[], &["task_created"]).await;
        let task = sample_task(&fx).await;
        let context = fx.dispatcher.task_context(&task);
        assert!(context.contains("Requester (asked for this): Rita"));
        assert!(context.contains("Owner (doing the work): unassigned"));
    }
}
