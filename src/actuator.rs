use std::time::Duration;

use async_trait::async_trait;

use crate::error::ActionError;
use crate::tabs::TabSummary;
use crate::types::{PageSnapshot, ScrollDirection};

/// The browser side of the loop: observes pages and performs actions.
///
/// Every failure is reported as an [`ActionError`]; an action that could not
/// be carried out never returns `Ok`.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), ActionError>;

    async fn click(&self, selector: &str) -> Result<(), ActionError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ActionError>;

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<(), ActionError>;

    async fn wait(&self, duration: Duration) -> Result<(), ActionError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    /// Observe the active tab.
    async fn extract_snapshot(&self) -> Result<PageSnapshot, ActionError>;

    /// Open a tab, make it active and optionally load `url` in it.
    async fn open_tab(&self, url: Option<&str>) -> Result<(), ActionError>;

    async fn switch_tab(&self, index: usize) -> Result<(), ActionError>;

    fn tabs(&self) -> TabSummary;

    fn tab_count(&self) -> usize {
        self.tabs().count
    }

    fn active_tab(&self) -> Option<usize> {
        self.tabs().active
    }

    /// Cookies and similar session state, as opaque bytes.
    async fn export_session(&self) -> Result<Vec<u8>, ActionError>;

    async fn import_session(&self, blob: &[u8]) -> Result<(), ActionError>;

    async fn close(&self) -> Result<(), ActionError>;
}
