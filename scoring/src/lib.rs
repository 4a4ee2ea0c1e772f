#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Keyword-rule scoring engine. Classifies free text against a process-wide
//! read-optimized rule cache that is rebuilt wholesale and swapped after
//! every rule mutation.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a rule keyword matches candidate text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-insensitive substring match.
    Contains,
    /// Case-insensitive full-text equality.
    Exact,
}

/// One classification rule. Immutable per evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRule {
    /// Rule identifier, also the deterministic tie-breaker.
    pub id: Uuid,
    /// Keyword to match.
    pub keyword: String,
    /// Matching mode.
    pub mode: MatchMode,
    /// Points awarded when the rule wins.
    pub score: i64,
    /// Category label applied when the rule wins.
    pub category: String,
}

/// Classification outcome for a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Winning score.
    pub score: i64,
    /// Winning category label.
    pub category: String,
}

/// Rule store plus the swap-on-write classification cache. Readers during a
/// rebuild observe either the old snapshot or the new one, never a partial
/// state.
pub struct RuleBook {
    rules: RwLock<Vec<ScoringRule>>,
    cache: RwLock<Arc<Vec<ScoringRule>>>,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl RuleBook {
    /// Creates a book with no rules at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            cache: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Creates a book seeded with the default rule set used on first boot.
    #[must_use]
    pub fn with_default_rules() -> Self {
        let book = Self::empty();
        for (keyword, mode, score, category) in [
            ("urgent", MatchMode::Contains, 10, "Escalation"),
            ("outage", MatchMode::Contains, 10, "Escalation"),
            ("bug", MatchMode::Contains, 8, "Defect"),
            ("fix", MatchMode::Contains, 8, "Defect"),
            ("report", MatchMode::Contains, 5, "Reporting"),
            ("review", MatchMode::Contains, 4, "Review"),
            ("meeting", MatchMode::Contains, 2, "Coordination"),
            ("standup", MatchMode::Exact, 1, "Coordination"),
        ] {
            book.upsert(ScoringRule {
                id: Uuid::new_v4(),
                keyword: keyword.to_string(),
                mode,
                score,
                category: category.to_string(),
            });
        }
        book
    }

    /// Inserts or replaces a rule, then rebuilds the cache synchronously so
    /// the next classification reflects it.
    pub fn upsert(&self, rule: ScoringRule) {
        {
            let mut rules = self.rules.write();
            match rules.iter_mut().find(|existing| existing.id == rule.id) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
        }
        self.rebuild_cache();
    }

    /// Removes a rule; a no-op for unknown ids. Rebuilds the cache.
    pub fn remove(&self, id: Uuid) {
        self.rules.write().retain(|rule| rule.id != id);
        self.rebuild_cache();
    }

    /// All rules, in insertion order.
    #[must_use]
    pub fn rules(&self) -> Vec<ScoringRule> {
        self.rules.read().clone()
    }

    /// Classifies text against the cached rule set. Among matching rules the
    /// highest score wins; ties break on the smaller rule id so repeated
    /// calls over an unchanged rule set are deterministic. `None` means
    /// "uncategorized, score 0" to callers, never an error.
    #[must_use]
    pub fn classify(&self, text: &str) -> Option<Classification> {
        let cache = Arc::clone(&self.cache.read());
        let lowered = text.to_lowercase();
        let trimmed = lowered.trim();
        let mut winner: Option<&ScoringRule> = None;
        for rule in cache.iter() {
            let keyword = rule.keyword.to_lowercase();
            let matched = match rule.mode {
                MatchMode::Contains => lowered.contains(&keyword),
                MatchMode::Exact => trimmed == keyword,
            };
            if !matched {
                continue;
            }
            let better = winner.is_none_or(|best| {
                rule.score > best.score || (rule.score == best.score && rule.id < best.id)
            });
            if better {
                winner = Some(rule);
            }
        }
        winner.map(|rule| Classification {
            score: rule.score,
            category: rule.category.clone(),
        })
    }

    fn rebuild_cache(&self) {
        let snapshot = Arc::new(self.rules.read().clone());
        *self.cache.write() = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keyword: &str, mode: MatchMode, score: i64, category: &str) -> ScoringRule {
        ScoringRule {
            id: Uuid::new_v4(),
            keyword: keyword.to_string(),
            mode,
            score,
            category: category.to_string(),
        }
    }

    #[test]
    fn highest_score_wins() {
        let book = RuleBook::empty();
        book.upsert(rule("deploy", MatchMode::Contains, 3, "Ops"));
        book.upsert(rule("deploy failed", MatchMode::Contains, 9, "Escalation"));
        let result = book.classify("the deploy failed again").unwrap();
        assert_eq!(result.score, 9);
        assert_eq!(result.category, "Escalation");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let book = RuleBook::empty();
        book.upsert(rule("BUG", MatchMode::Contains, 8, "Defect"));
        assert!(book.classify("found a bug in checkout").is_some());
    }

    #[test]
    fn exact_mode_requires_full_equality() {
        let book = RuleBook::empty();
        book.upsert(rule("standup", MatchMode::Exact, 1, "Coordination"));
        assert!(book.classify("standup").is_some());
        assert!(book.classify("  Standup  ").is_some());
        assert!(book.classify("daily standup notes").is_none());
    }

    #[test]
    fn no_match_returns_none() {
        let book = RuleBook::empty();
        book.upsert(rule("bug", MatchMode::Contains, 8, "Defect"));
        assert!(book.classify("ship the newsletter").is_none());
    }

    #[test]
    fn ties_break_deterministically() {
        let book = RuleBook::empty();
        book.upsert(rule("alpha", MatchMode::Contains, 5, "A"));
        book.upsert(rule("omega", MatchMode::Contains, 5, "B"));
        let first = book.classify("alpha omega").unwrap();
        for _ in 0..10 {
            assert_eq!(book.classify("alpha omega").unwrap(), first);
        }
    }

    #[test]
    fn mutations_refresh_the_cache_synchronously() {
        let book = RuleBook::empty();
        let doomed = rule("legacy", MatchMode::Contains, 7, "Legacy");
        let doomed_id = doomed.id;
        book.upsert(doomed);
        assert!(book.classify("legacy migration").is_some());
        book.remove(doomed_id);
        assert!(book.classify("legacy migration").is_none());
    }

    #[test]
    fn default_rules_are_seeded() {
        let book = RuleBook::with_default_rules();
        let result = book.classify("urgent: login is broken").unwrap();
        assert_eq!(result.category, "Escalation");
        assert_eq!(result.score, 10);
    }
}
