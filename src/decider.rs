use async_trait::async_trait;

use crate::error::DeciderError;
use crate::history::History;
use crate::types::{ActionIntent, ActionName, PageSnapshot, Task};

/// The inference side of the loop: chooses the next action.
#[async_trait]
pub trait Decider: Send + Sync {
    /// Pick the next intent for `task` given the current page and everything
    /// tried so far. Only actions in `vocabulary` may be proposed.
    ///
    /// `Ok(None)` means the decider considers the task complete.
    async fn decide(
        &self,
        task: &Task,
        snapshot: &PageSnapshot,
        history: &History,
        vocabulary: &[ActionName],
    ) -> Result<Option<ActionIntent>, DeciderError>;

    /// Free-form analysis of a page in the context of a task. Diagnostic only.
    async fn analyze_page(&self, snapshot: &PageSnapshot, task: &str) -> Result<String, DeciderError>;
}
