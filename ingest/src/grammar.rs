//! The inline command grammar recognized in chat text.

use once_cell::sync::Lazy;
use regex::Regex;

use crewflow_lifecycle::Priority;

/// Explicit task-request prefixes, checked before any agent matching.
pub const COMMAND_PREFIXES: &[&str] = &["!task", "/job", "@bot"];

/// Usage text returned by the `!help` short-circuit. Never generated.
pub const HELP_TEXT: &str = "Crewflow commands:\n\
!task <request> — turn your request into a tracked task\n\
/job <request> — same as !task\n\
@bot <request> — same as !task\n\
[P1] [P2] [P3] — anywhere in the text, forces the task priority\n\
!help — this message\n\
You can also address your team's squad agent by name.";

static PRIORITY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[(p[123])\]").expect("priority tag pattern"));

/// Whether the message is the `!help` short-circuit. Only the first
/// whitespace-delimited token counts, so `!helpful ...` is ordinary chat.
#[must_use]
pub fn is_help(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .is_some_and(|token| token.eq_ignore_ascii_case("!help"))
}

/// Strips a matching command prefix and returns the remaining request text.
#[must_use]
pub fn command_body(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    for prefix in COMMAND_PREFIXES {
        if let Some(head) = trimmed.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                return Some(trimmed[prefix.len()..].trim());
            }
        }
    }
    None
}

/// First inline `[P1]`/`[P2]`/`[P3]` tag anywhere in the text. Wins over the
/// extractor's suggested priority.
#[must_use]
pub fn inline_priority(text: &str) -> Option<Priority> {
    PRIORITY_TAG
        .captures(text)
        .and_then(|captures| Priority::parse(&captures[1]))
}

/// Removes inline priority tags so they do not leak into titles.
#[must_use]
pub fn strip_priority_tags(text: &str) -> String {
    PRIORITY_TAG.replace_all(text, "").trim().to_string()
}
