//! Error types shared by the control loop and its collaborators.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single browser action.
///
/// These never end a task on their own: the orchestrator records them in the
/// history and lets the decider route around them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    /// The intent is missing a required field or is otherwise malformed.
    #[error("invalid action: {0}")]
    Validation(String),

    /// The selector did not resolve to an element within the wait timeout.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// The action did not finish within its time budget.
    #[error("action timed out after {0:?}")]
    Timeout(Duration),

    /// The browser or its transport reported an error.
    #[error("browser error: {0}")]
    Transport(String),

    /// Every tab has been closed; the browser can no longer be driven.
    #[error("no open tabs")]
    NoTabs,

    #[error("tab index {index} out of range ({count} open)")]
    TabOutOfRange { index: usize, count: usize },
}

impl ActionError {
    /// Whether the failure is about resolving a selector on the page.
    pub fn is_unresolved_selector(&self) -> bool {
        matches!(self, ActionError::ElementNotFound { .. })
    }
}

/// Failure of the inference backend. Fatal to the task.
#[derive(Debug, Error)]
pub enum DeciderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The reply could not be turned into a complete intent.
    #[error("could not decode reply: {0}")]
    Decode(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Conditions that terminate the control loop.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("decider failed: {0}")]
    Decider(#[from] DeciderError),

    #[error("task cancelled")]
    Cancelled,

    #[error("reached the limit of {0} iterations without completing")]
    MaxIterationsExceeded(usize),

    #[error("operator denied: {0}")]
    ApprovalDenied(String),

    /// The page could not be observed, so there is nothing to decide on.
    #[error("failed to observe page: {0}")]
    Observation(ActionError),

    #[error("no task to resume")]
    NoActiveTask,

    #[error("no action is waiting for approval")]
    NoPendingApproval,

    /// Resuming would skip the approval the operator still owes.
    #[error("an action is waiting for approval")]
    ApprovalPending,
}

/// Failure reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file: {0}")]
    Format(#[from] serde_json::Error),
}
