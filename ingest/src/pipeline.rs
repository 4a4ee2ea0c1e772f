//! The pipeline itself: synchronous persist+broadcast, detached
//! classification and processing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use uuid::Uuid;

use crewflow_directory::{
    Channel, ChannelKind, ChannelRegistry, DepartmentRegistry, DirectoryError, Message,
    MessageLog, NewMessage, UserDirectory,
};
use crewflow_genai::ExtractionClient;
use crewflow_lifecycle::{NewTask, Priority, TaskStore};
use crewflow_squad::{SquadAgent, SquadDispatcher};

use crate::grammar::{command_body, inline_priority, is_help, strip_priority_tags, HELP_TEXT};
use crate::IngestError;

const DEFAULT_CONFIRMATION_DELAY: Duration = Duration::from_millis(750);

/// Classified intent of one chat message.
#[derive(Debug)]
enum Intent {
    /// `!help` short-circuit.
    Help,
    /// Explicit task request via a command prefix.
    CreateTask {
        /// Request text with the prefix stripped.
        body: String,
    },
    /// Message starts with a known agent's name.
    AgentDirect {
        /// Target agent.
        agent: SquadAgent,
        /// Text after the agent name.
        question: String,
    },
    /// Message merely contains a known agent's name.
    AgentMention {
        /// Target agent.
        agent: SquadAgent,
    },
    /// Plain chat.
    Nothing,
}

/// Entry point for chat posts. Persistence and broadcast happen within the
/// post call; classification and any extraction/task creation run in a
/// detached flow the poster never waits on.
pub struct MessagePipeline {
    users: Arc<UserDirectory>,
    departments: Arc<DepartmentRegistry>,
    channels: Arc<ChannelRegistry>,
    messages: Arc<MessageLog>,
    tasks: Arc<TaskStore>,
    extraction: Arc<ExtractionClient>,
    dispatcher: Arc<SquadDispatcher>,
    confirmation_delay: Duration,
}

impl MessagePipeline {
    /// Creates a pipeline wired to its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<UserDirectory>,
        departments: Arc<DepartmentRegistry>,
        channels: Arc<ChannelRegistry>,
        messages: Arc<MessageLog>,
        tasks: Arc<TaskStore>,
        extraction: Arc<ExtractionClient>,
        dispatcher: Arc<SquadDispatcher>,
    ) -> Self {
        Self {
            users,
            departments,
            channels,
            messages,
            tasks,
            extraction,
            dispatcher,
            confirmation_delay: DEFAULT_CONFIRMATION_DELAY,
        }
    }

    /// Overrides the confirmation-message delay (tests use zero).
    #[must_use]
    pub const fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    /// Posts a chat message. Membership is enforced before persistence for
    /// private/group channels (admins exempt, anonymous system messages
    /// bypass the check). The returned message reflects persistence and
    /// broadcast; task linkage, if any, arrives via a later
    /// `message_updated` broadcast on the same message id.
    pub async fn post(self: &Arc<Self>, new: NewMessage) -> Result<Message, IngestError> {
        let channel = self
            .channels
            .get(new.channel_id)
            .ok_or(DirectoryError::ChannelNotFound(new.channel_id))?;
        let is_admin = new.sender_id.is_some_and(|sender| self.users.is_admin(sender));
        if !channel.allows_post(new.sender_id, is_admin) {
            return Err(IngestError::NotAMember {
                user: new.sender_id.unwrap_or_default(),
                channel: channel.id,
            });
        }

        let message = self.messages.append(new).await?;

        let pipeline = Arc::clone(self);
        let detached = message.clone();
        tokio::spawn(async move {
            pipeline.process(&detached, &channel).await;
        });
        Ok(message)
    }

    /// Detached classification and processing for one posted message. All
    /// errors are logged here and never reach the poster.
    pub async fn process(&self, message: &Message, channel: &Channel) {
        // System and agent posts are never actionable; without this guard
        // confirmations and commentary would re-enter the pipeline.
        let Some(sender_id) = message.sender_id else {
            return;
        };
        if self.users.get(sender_id).is_some_and(|user| user.is_agent) {
            return;
        }

        match self.classify(&message.content) {
            Intent::Help => {
                self.post_system(channel.id, HELP_TEXT.to_string()).await;
            }
            Intent::CreateTask { body } => {
                self.create_task_flow(message, channel, sender_id, &body)
                    .await;
            }
            Intent::AgentDirect { agent, question } => {
                self.dispatcher
                    .respond_direct(&agent, channel.id, &question)
                    .await;
            }
            Intent::AgentMention { agent } => {
                self.dispatcher
                    .respond_mention(&agent, channel.id, &message.content)
                    .await;
            }
            Intent::Nothing => {}
        }
    }

    /// Classification precedence: help short-circuit, explicit command
    /// prefixes, agent-name-as-prefix, agent mentioned anywhere, nothing.
    fn classify(&self, content: &str) -> Intent {
        if is_help(content) {
            return Intent::Help;
        }
        if let Some(body) = command_body(content) {
            return Intent::CreateTask {
                body: body.to_string(),
            };
        }
        let roster = self.dispatcher.roster();
        if let Some(agent) = roster.match_prefix(content) {
            let question = text_after_name(content.trim_start(), &agent.display_name)
                .trim_start_matches([',', ':', ' '])
                .to_string();
            return Intent::AgentDirect { agent, question };
        }
        if let Some(agent) = roster.match_mention(content) {
            return Intent::AgentMention { agent };
        }
        Intent::Nothing
    }

    async fn create_task_flow(
        &self,
        message: &Message,
        channel: &Channel,
        requester_id: Uuid,
        body: &str,
    ) {
        if body.is_empty() {
            self.post_system(channel.id, HELP_TEXT.to_string()).await;
            return;
        }

        let (draft, tokens_used) = self.extraction.extract_task(body).await;
        debug!(tokens_used, "extraction finished");

        // Inline tag beats the extractor's suggestion.
        let priority = inline_priority(&message.content)
            .or_else(|| Priority::parse(&draft.priority))
            .unwrap_or_default();
        let department_id = self.resolve_department(channel);

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "message_id".to_string(),
            serde_json::Value::String(message.id.to_string()),
        );
        metadata.insert(
            "channel_id".to_string(),
            serde_json::Value::String(channel.id.to_string()),
        );

        let title = strip_priority_tags(&draft.title);
        let description = if draft.description.is_empty() {
            body.to_string()
        } else {
            draft.description
        };
        let created = self
            .tasks
            .create(
                NewTask {
                    title,
                    description,
                    department_id,
                    priority: Some(priority),
                    metadata,
                    ..NewTask::default()
                },
                requester_id,
            )
            .await;
        let task = match created {
            Ok(task) => task,
            Err(err) => {
                error!(error = %err, message_id = %message.id, "task creation failed");
                return;
            }
        };
        info!(task_id = %task.id, priority = task.priority.label(), "task created from chat");

        if let Err(err) = self.messages.link_task(message.id, task.id).await {
            error!(error = %err, task_id = %task.id, "message back-link failed");
        }

        // Give the creation broadcast a head start before the confirmation.
        tokio::time::sleep(self.confirmation_delay).await;
        let department = self
            .departments
            .get(task.department_id)
            .map_or_else(|| "General".to_string(), |d| d.name);
        self.post_system(
            channel.id,
            format!(
                "Created task \"{}\" ({}) for {} \u{2014} status {}.",
                task.title,
                task.priority.label(),
                department,
                task.status.label()
            ),
        )
        .await;
    }

    /// Department resolution order: the channel's linked department, the
    /// channel's own name when it represents a department, a department
    /// found or created from the (group) channel name, `General` last.
    fn resolve_department(&self, channel: &Channel) -> Uuid {
        if let Some(department_id) = channel.department_id {
            return department_id;
        }
        if channel.kind == ChannelKind::Department {
            if let Some(department) = self.departments.by_name(&channel.name) {
                return department.id;
            }
        }
        if channel.kind == ChannelKind::Group {
            return self.departments.find_or_create(&channel.name).id;
        }
        self.departments.general_id()
    }

    /// Best-effort system post; failures are logged and swallowed.
    async fn post_system(&self, channel_id: Uuid, content: String) {
        if let Err(err) = self
            .messages
            .append(NewMessage::system(channel_id, content))
            .await
        {
            error!(error = %err, "system message post failed");
        }
    }
}

/// Text following a case-insensitive match of `name` at the start of `text`.
/// The prefix match was made on lowercased text, and lowercasing can change
/// byte lengths, so the cut point is found by walking both strings instead of
/// slicing with `name.len()`. Returns an empty string on a failed walk.
fn text_after_name<'a>(text: &'a str, name: &str) -> &'a str {
    let mut expected = name.chars().flat_map(char::to_lowercase);
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let Some(want) = expected.next() else {
            end = idx;
            break;
        };
        let mut lowered = ch.to_lowercase();
        if lowered.next() != Some(want) {
            return "";
        }
        for extra in lowered {
            if expected.next() != Some(extra) {
                return "";
            }
        }
        end = idx + ch.len_utf8();
    }
    if expected.next().is_some() {
        return "";
    }
    text.get(end..).unwrap_or_default()
}
