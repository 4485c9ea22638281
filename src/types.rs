use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::gate::Verdict;

/// Maximum characters of visible text kept in a snapshot.
pub const VISIBLE_TEXT_MAX_CHARS: usize = 4000;

/// Longest pause a `wait` action may ask for.
pub const MAX_WAIT_SECS: u64 = 30;

/// Lifecycle of a user task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    WaitingOnUser,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A natural-language task submitted by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    /// Why the task stopped, set whenever it leaves `InProgress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            status: TaskStatus::Pending,
            reason: None,
        }
    }
}

/// An interactive element as reported by the page observer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveElement {
    pub tag: String,
    pub text: String,
    pub selector: String,
    pub is_visible: bool,
    pub is_clickable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkInfo {
    pub text: String,
    pub href: String,
    pub selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputInfo {
    pub kind: String,
    pub name: String,
    pub placeholder: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormInfo {
    pub action: String,
    pub method: String,
    pub inputs: Vec<InputInfo>,
    pub submit_text: String,
}

/// Point-in-time, read-only description of the active page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub description: String,
    pub visible_text: String,
    pub interactive_elements: Vec<InteractiveElement>,
    pub links: Vec<LinkInfo>,
    pub forms: Vec<FormInfo>,
    pub buttons: Vec<InteractiveElement>,
}

impl PageSnapshot {
    /// Selectors of visible, clickable elements, in page order, without duplicates.
    pub fn candidate_selectors(&self, limit: usize) -> Vec<String> {
        let mut selectors: Vec<String> = Vec::new();
        for el in self.interactive_elements.iter().chain(self.buttons.iter()) {
            if selectors.len() >= limit {
                break;
            }
            if el.is_visible
                && el.is_clickable
                && !el.selector.is_empty()
                && !selectors.contains(&el.selector)
            {
                selectors.push(el.selector.clone());
            }
        }
        selectors
    }

    /// Visible text of the element addressed by `selector`, if the snapshot has it.
    pub fn element_text(&self, selector: &str) -> Option<&str> {
        self.interactive_elements
            .iter()
            .chain(self.buttons.iter())
            .find(|el| el.selector == selector)
            .map(|el| el.text.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

fn default_scroll_amount() -> u32 {
    500
}

/// What the decider wants done next, with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    TypeText {
        selector: String,
        text: String,
    },
    Scroll {
        direction: ScrollDirection,
        #[serde(default = "default_scroll_amount")]
        amount: u32,
    },
    Extract,
    Wait {
        seconds: u64,
    },
    OpenTab {
        #[serde(default)]
        url: Option<String>,
    },
    SwitchTab {
        index: usize,
    },
    Complete {
        summary: String,
    },
    /// The decider wants the operator to confirm `proposed` before it runs.
    AskApproval {
        proposed: Box<ActionKind>,
        reason: String,
    },
    /// The decider answered in free text instead of choosing an action.
    AskUser {
        question: String,
    },
}

impl ActionKind {
    pub fn name(&self) -> ActionName {
        match self {
            ActionKind::Navigate { .. } => ActionName::Navigate,
            ActionKind::Click { .. } => ActionName::Click,
            ActionKind::TypeText { .. } => ActionName::TypeText,
            ActionKind::Scroll { .. } => ActionName::Scroll,
            ActionKind::Extract => ActionName::Extract,
            ActionKind::Wait { .. } => ActionName::Wait,
            ActionKind::OpenTab { .. } => ActionName::OpenTab,
            ActionKind::SwitchTab { .. } => ActionName::SwitchTab,
            ActionKind::Complete { .. } => ActionName::Complete,
            ActionKind::AskApproval { .. } => ActionName::AskApproval,
            ActionKind::AskUser { .. } => ActionName::AskUser,
        }
    }

    /// The CSS selector the action targets, if any.
    pub fn selector(&self) -> Option<&str> {
        match self {
            ActionKind::Click { selector } | ActionKind::TypeText { selector, .. } => {
                Some(selector)
            }
            ActionKind::AskApproval { proposed, .. } => proposed.selector(),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ActionError> {
        match self {
            ActionKind::Navigate { url } if url.trim().is_empty() => Err(ActionError::Validation(
                "navigate requires a url".to_string(),
            )),
            ActionKind::Click { selector } if selector.trim().is_empty() => Err(
                ActionError::Validation("click requires a selector".to_string()),
            ),
            ActionKind::TypeText { selector, .. } if selector.trim().is_empty() => Err(
                ActionError::Validation("type_text requires a selector".to_string()),
            ),
            ActionKind::Wait { seconds } if *seconds == 0 || *seconds > MAX_WAIT_SECS => {
                Err(ActionError::Validation(format!(
                    "wait must be between 1 and {MAX_WAIT_SECS} seconds"
                )))
            }
            ActionKind::AskApproval { proposed, .. } => match proposed.as_ref() {
                ActionKind::AskApproval { .. }
                | ActionKind::AskUser { .. }
                | ActionKind::Complete { .. } => Err(ActionError::Validation(format!(
                    "{} cannot be approved",
                    proposed.name()
                ))),
                inner => inner.validate(),
            },
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Navigate { url } => write!(f, "navigate to {url}"),
            ActionKind::Click { selector } => write!(f, "click {selector}"),
            ActionKind::TypeText { selector, text } => write!(f, "type \"{text}\" into {selector}"),
            ActionKind::Scroll { direction, amount } => {
                let dir = match direction {
                    ScrollDirection::Up => "up",
                    ScrollDirection::Down => "down",
                };
                write!(f, "scroll {dir} by {amount}px")
            }
            ActionKind::Extract => write!(f, "extract page content"),
            ActionKind::Wait { seconds } => write!(f, "wait {seconds}s"),
            ActionKind::OpenTab { url: Some(url) } => write!(f, "open new tab at {url}"),
            ActionKind::OpenTab { url: None } => write!(f, "open new tab"),
            ActionKind::SwitchTab { index } => write!(f, "switch to tab {index}"),
            ActionKind::Complete { summary } => write!(f, "complete: {summary}"),
            ActionKind::AskApproval { proposed, reason } => {
                write!(f, "ask approval to {proposed} ({reason})")
            }
            ActionKind::AskUser { question } => write!(f, "ask user: {question}"),
        }
    }
}

/// A proposed next action together with the decider's reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionIntent {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub reasoning: String,
}

impl ActionIntent {
    pub fn new(kind: ActionKind, reasoning: impl Into<String>) -> Self {
        Self {
            kind,
            reasoning: reasoning.into(),
        }
    }

    pub fn name(&self) -> ActionName {
        self.kind.name()
    }

    pub fn description(&self) -> String {
        self.kind.to_string()
    }

    /// The intent that actually runs once approval has been granted.
    pub fn into_approved(self) -> ActionIntent {
        match self.kind {
            ActionKind::AskApproval { proposed, .. } => ActionIntent {
                kind: *proposed,
                reasoning: self.reasoning,
            },
            kind => ActionIntent {
                kind,
                reasoning: self.reasoning,
            },
        }
    }
}

/// The action vocabulary offered to the decider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    Navigate,
    Click,
    TypeText,
    Scroll,
    Extract,
    Wait,
    OpenTab,
    SwitchTab,
    Complete,
    AskApproval,
    AskUser,
}

impl ActionName {
    pub const ALL: [ActionName; 11] = [
        ActionName::Navigate,
        ActionName::Click,
        ActionName::TypeText,
        ActionName::Scroll,
        ActionName::Extract,
        ActionName::Wait,
        ActionName::OpenTab,
        ActionName::SwitchTab,
        ActionName::Complete,
        ActionName::AskApproval,
        ActionName::AskUser,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionName::Navigate => "navigate",
            ActionName::Click => "click",
            ActionName::TypeText => "type_text",
            ActionName::Scroll => "scroll",
            ActionName::Extract => "extract",
            ActionName::Wait => "wait",
            ActionName::OpenTab => "open_tab",
            ActionName::SwitchTab => "switch_tab",
            ActionName::Complete => "complete",
            ActionName::AskApproval => "ask_approval",
            ActionName::AskUser => "ask_user",
        }
    }

    pub fn parse(name: &str) -> Option<ActionName> {
        ActionName::ALL.into_iter().find(|n| n.as_str() == name)
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one intent.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub error: Option<ActionError>,
    /// Page state after the action. Always present on success.
    pub snapshot: Option<PageSnapshot>,
}

impl ActionResult {
    pub fn succeeded(message: impl Into<String>, snapshot: PageSnapshot) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            snapshot: Some(snapshot),
        }
    }

    pub fn failed(error: ActionError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            error: Some(error),
            snapshot: None,
        }
    }
}

/// An intent held back until the operator approves or denies it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApproval {
    pub intent: ActionIntent,
    pub verdict: Verdict,
    pub page_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(selector: &str, visible: bool, clickable: bool) -> InteractiveElement {
        InteractiveElement {
            tag: "button".to_string(),
            text: selector.to_string(),
            selector: selector.to_string(),
            is_visible: visible,
            is_clickable: clickable,
        }
    }

    #[test]
    fn test_intent_decodes_from_tagged_json() {
        let intent: ActionIntent = serde_json::from_str(
            r##"{"action":"type_text","selector":"#q","text":"rust","reasoning":"search"}"##,
        )
        .unwrap();
        assert_eq!(
            intent.kind,
            ActionKind::TypeText {
                selector: "#q".to_string(),
                text: "rust".to_string()
            }
        );
        assert_eq!(intent.reasoning, "search");

        let scroll: ActionKind =
            serde_json::from_str(r#"{"action":"scroll","direction":"down"}"#).unwrap();
        assert_eq!(
            scroll,
            ActionKind::Scroll {
                direction: ScrollDirection::Down,
                amount: 500
            }
        );
    }

    #[test]
    fn test_missing_field_is_hard_error() {
        let result = serde_json::from_str::<ActionIntent>(r#"{"action":"click"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(
            ActionKind::Click {
                selector: " ".to_string()
            }
            .validate()
            .is_err()
        );
        assert!(
            ActionKind::Navigate {
                url: "https://example.com".to_string()
            }
            .validate()
            .is_ok()
        );
        let nested = ActionKind::AskApproval {
            proposed: Box::new(ActionKind::Complete {
                summary: "x".into(),
            }),
            reason: "r".into(),
        };
        assert!(matches!(nested.validate(), Err(ActionError::Validation(_))));

        assert!(ActionKind::Wait { seconds: 0 }.validate().is_err());
        assert!(ActionKind::Wait { seconds: MAX_WAIT_SECS }.validate().is_ok());
        assert!(ActionKind::Wait { seconds: u64::MAX }.validate().is_err());
    }

    #[test]
    fn test_into_approved_unwraps_proposal() {
        let intent = ActionIntent::new(
            ActionKind::AskApproval {
                proposed: Box::new(ActionKind::Click {
                    selector: "#pay".into(),
                }),
                reason: "payment".into(),
            },
            "needs confirmation",
        );
        let approved = intent.into_approved();
        assert_eq!(approved.name(), ActionName::Click);
        assert_eq!(approved.reasoning, "needs confirmation");
    }

    #[test]
    fn test_candidate_selectors() {
        let snapshot = PageSnapshot {
            interactive_elements: vec![
                element("#a", true, true),
                element("#hidden", false, true),
                element("#b", true, true),
            ],
            buttons: vec![element("#a", true, true), element("#c", true, true)],
            ..Default::default()
        };
        assert_eq!(snapshot.candidate_selectors(10), vec!["#a", "#b", "#c"]);
        assert_eq!(snapshot.candidate_selectors(2), vec!["#a", "#b"]);
    }

    #[test]
    fn test_action_name_round_trip() {
        for name in ActionName::ALL {
            assert_eq!(ActionName::parse(name.as_str()), Some(name));
        }
        assert_eq!(ActionName::parse("screenshot"), None);
    }
}
