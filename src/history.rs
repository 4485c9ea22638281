//! Append-only record of what the agent tried and what happened.
//!
//! The entries are replayed to the decider in insertion order, so they are
//! never reordered or pruned while a task is alive.

use serde::{Deserialize, Serialize};

use crate::config::SuppressionPolicy;
use crate::types::{ActionIntent, ActionName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        message: String,
    },
    Failure {
        error: String,
        /// Visible selectors on the page after a selector failed to resolve.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        candidates: Vec<String>,
    },
    /// The operator refused a gated action.
    Denied {
        reason: String,
    },
    /// The decider asked the operator something.
    Asked {
        question: String,
    },
    /// Free-text answer from the operator.
    Operator {
        reply: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<ActionIntent>,
    pub description: String,
    pub outcome: Outcome,
}

impl HistoryEntry {
    pub fn action_name(&self) -> Option<ActionName> {
        self.intent.as_ref().map(ActionIntent::name)
    }

    /// One-line rendering used when replaying the history to the decider.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Success { message } => format!("{}: ok ({message})", self.description),
            Outcome::Failure { error, candidates } if candidates.is_empty() => {
                format!("{}: FAILED ({error})", self.description)
            }
            Outcome::Failure { error, candidates } => format!(
                "{}: FAILED ({error}). Visible elements: {}",
                self.description,
                candidates.join(", ")
            ),
            Outcome::Denied { reason } => format!("{}: DENIED by operator ({reason})", self.description),
            Outcome::Asked { question } => format!("asked operator: {question}"),
            Outcome::Operator { reply } => format!("operator replied: {reply}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn record_success(&mut self, intent: &ActionIntent, message: impl Into<String>) {
        self.push_intent(
            intent,
            Outcome::Success {
                message: message.into(),
            },
        );
    }

    pub fn record_failure(&mut self, intent: &ActionIntent, error: impl Into<String>, candidates: Vec<String>) {
        self.push_intent(
            intent,
            Outcome::Failure {
                error: error.into(),
                candidates,
            },
        );
    }

    pub fn record_denial(&mut self, intent: &ActionIntent, reason: impl Into<String>) {
        self.push_intent(
            intent,
            Outcome::Denied {
                reason: reason.into(),
            },
        );
    }

    pub fn record_question(&mut self, question: impl Into<String>) {
        let question = question.into();
        self.entries.push(HistoryEntry {
            intent: None,
            description: "ask user".to_string(),
            outcome: Outcome::Asked { question },
        });
    }

    pub fn record_operator_reply(&mut self, reply: impl Into<String>) {
        self.entries.push(HistoryEntry {
            intent: None,
            description: "operator reply".to_string(),
            outcome: Outcome::Operator {
                reply: reply.into(),
            },
        });
    }

    fn push_intent(&mut self, intent: &ActionIntent, outcome: Outcome) {
        self.entries.push(HistoryEntry {
            intent: Some(intent.clone()),
            description: intent.description(),
            outcome,
        });
    }

    /// Actions the decider may choose from on the next call.
    ///
    /// Recomputed from the history window on every iteration.
    pub fn offered_vocabulary(&self, policy: &SuppressionPolicy) -> Vec<ActionName> {
        let extract_recent = self
            .recent(policy.extract_window)
            .iter()
            .any(|e| e.action_name() == Some(ActionName::Extract));
        let scrolls = self
            .recent(policy.scroll_window)
            .iter()
            .filter(|e| e.action_name() == Some(ActionName::Scroll))
            .count();
        let scroll_throttled = scrolls >= policy.scroll_threshold;

        ActionName::ALL
            .into_iter()
            .filter(|name| match name {
                ActionName::Extract => !extract_recent,
                ActionName::Scroll => !scroll_throttled,
                _ => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionKind, ScrollDirection};

    fn intent(kind: ActionKind) -> ActionIntent {
        ActionIntent::new(kind, "")
    }

    fn scroll() -> ActionIntent {
        intent(ActionKind::Scroll {
            direction: ScrollDirection::Down,
            amount: 300,
        })
    }

    fn click() -> ActionIntent {
        intent(ActionKind::Click {
            selector: "#go".into(),
        })
    }

    #[test]
    fn test_full_vocabulary_on_empty_history() {
        let history = History::new();
        let vocab = history.offered_vocabulary(&SuppressionPolicy::default());
        assert_eq!(vocab.len(), ActionName::ALL.len());
    }

    #[test]
    fn test_recent_extract_suppresses_extract() {
        let mut history = History::new();
        history.record_success(&intent(ActionKind::Extract), "text");
        history.record_success(&click(), "ok");
        history.record_failure(&click(), "boom", vec![]);

        let vocab = history.offered_vocabulary(&SuppressionPolicy::default());
        assert!(!vocab.contains(&ActionName::Extract));
        assert!(vocab.contains(&ActionName::Scroll));

        history.record_success(&click(), "ok");
        let vocab = history.offered_vocabulary(&SuppressionPolicy::default());
        assert!(vocab.contains(&ActionName::Extract));
    }

    #[test]
    fn test_failed_extract_still_counts() {
        let mut history = History::new();
        history.record_failure(&intent(ActionKind::Extract), "no page", vec![]);
        let vocab = history.offered_vocabulary(&SuppressionPolicy::default());
        assert!(!vocab.contains(&ActionName::Extract));
    }

    #[test]
    fn test_scroll_throttling() {
        let mut history = History::new();
        history.record_success(&scroll(), "ok");
        history.record_success(&click(), "ok");
        history.record_success(&scroll(), "ok");
        let policy = SuppressionPolicy::default();
        assert!(history.offered_vocabulary(&policy).contains(&ActionName::Scroll));

        history.record_success(&scroll(), "ok");
        assert!(!history.offered_vocabulary(&policy).contains(&ActionName::Scroll));

        // Older scrolls slide out of the five-entry window.
        history.record_success(&click(), "ok");
        history.record_success(&click(), "ok");
        history.record_success(&click(), "ok");
        assert!(history.offered_vocabulary(&policy).contains(&ActionName::Scroll));
    }

    #[test]
    fn test_custom_windows() {
        let policy = SuppressionPolicy {
            extract_window: 1,
            scroll_window: 2,
            scroll_threshold: 2,
        };
        let mut history = History::new();
        history.record_success(&intent(ActionKind::Extract), "text");
        history.record_success(&scroll(), "ok");
        history.record_success(&scroll(), "ok");
        let vocab = history.offered_vocabulary(&policy);
        assert!(vocab.contains(&ActionName::Extract));
        assert!(!vocab.contains(&ActionName::Scroll));
    }

    #[test]
    fn test_summary_includes_candidates() {
        let mut history = History::new();
        history.record_failure(
            &click(),
            "element not found: #go",
            vec!["#a".into(), "#b".into()],
        );
        let line = history.entries()[0].summary();
        assert_eq!(
            line,
            "click #go: FAILED (element not found: #go). Visible elements: #a, #b"
        );
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let mut history = History::new();
        history.record_success(&click(), "1");
        history.record_question("which one?");
        history.record_operator_reply("the first");
        let kinds: Vec<_> = history
            .entries()
            .iter()
            .map(|e| e.description.as_str())
            .collect();
        assert_eq!(kinds, vec!["click #go", "ask user", "operator reply"]);
    }
}
