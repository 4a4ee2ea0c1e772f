//! Structured task extraction and free-form commentary over the provider
//! call, both wrapped in the retry policy.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::provider::{CompletionRequest, GenerationError, TextGenerator};
use crate::retry::RetryPolicy;

const EXTRACT_SYSTEM: &str = "You convert a chat request into a tracked work item. \
Respond with strict JSON only: {\"title\": string, \"department\": string, \
\"priority\": \"P1\"|\"P2\"|\"P3\", \"description\": string}. No prose, no code fences.";

const FALLBACK_TITLE_LEN: usize = 60;

/// Structured fields extracted from a raw chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    /// Short task title.
    pub title: String,
    /// Suggested owning team name.
    #[serde(default)]
    pub department: String,
    /// Suggested priority, one of `P1`/`P2`/`P3`.
    #[serde(default)]
    pub priority: String,
    /// Longer task description.
    #[serde(default)]
    pub description: String,
}

/// Client for the two platform operations over the provider call. Task
/// extraction never fails: provider trouble degrades to a deterministic
/// fallback draft. Commentary degrades to an empty string, which callers
/// treat as "do not post".
pub struct ExtractionClient {
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl ExtractionClient {
    /// Creates a client over the given generator with the default policy.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            policy: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Extracts structured task fields from a raw message, returning the
    /// draft and the provider token usage. On any post-retry failure returns
    /// the deterministic fallback with zero usage; task creation is never
    /// blocked by extraction failure.
    pub async fn extract_task(&self, raw_text: &str) -> (TaskDraft, u64) {
        let request = CompletionRequest::new(EXTRACT_SYSTEM, raw_text);
        let outcome = self
            .policy
            .execute(|| self.generator.complete(request.clone()))
            .await;
        match outcome {
            Ok(completion) => match parse_draft(&completion.text) {
                Ok(draft) => (draft, completion.tokens_used),
                Err(err) => {
                    warn!(error = %err, "extraction returned unparseable draft, using fallback");
                    (fallback_draft(raw_text), 0)
                }
            },
            Err(err) => {
                warn!(error = %err, "extraction failed after retries, using fallback");
                (fallback_draft(raw_text), 0)
            }
        }
    }

    /// Generates agent commentary for a lifecycle event. Returns an empty
    /// string on failure; callers must treat empty as "do not post".
    pub async fn generate_commentary(
        &self,
        persona: &str,
        behavior_hint: &str,
        task_context: &str,
        event_name: &str,
        extra_context: Option<&str>,
    ) -> String {
        let system = format!(
            "You are a team squad agent. Persona: {persona}. {behavior_hint} \
Keep replies to two or three sentences of chat-ready text."
        );
        let mut prompt = format!("Event: {event_name}\n{task_context}");
        if let Some(extra) = extra_context {
            prompt.push('\n');
            prompt.push_str(extra);
        }
        let request = CompletionRequest::new(system, prompt);
        match self
            .policy
            .execute(|| self.generator.complete(request.clone()))
            .await
        {
            Ok(completion) => completion.text.trim().to_string(),
            Err(err) => {
                warn!(error = %err, event_name, "commentary generation failed, staying silent");
                String::new()
            }
        }
    }
}

fn parse_draft(text: &str) -> Result<TaskDraft, GenerationError> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let draft: TaskDraft = serde_json::from_str(cleaned)
        .map_err(|err| GenerationError::Malformed(err.to_string()))?;
    if draft.title.trim().is_empty() {
        return Err(GenerationError::Malformed("empty title".to_string()));
    }
    Ok(draft)
}

/// Deterministic degraded-mode draft: truncated raw text as title, default
/// department, medium priority.
fn fallback_draft(raw_text: &str) -> TaskDraft {
    let trimmed = raw_text.trim();
    TaskDraft {
        title: trimmed.chars().take(FALLBACK_TITLE_LEN).collect(),
        department: "General".to_string(),
        priority: "P2".to_string(),
        description: trimmed.to_string(),
    }
}
