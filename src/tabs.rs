//! Bookkeeping of open tabs and the active one.
//!
//! The session is shared between the control loop, which opens and switches
//! tabs, and an asynchronous event source reporting tabs the page opened or
//! closed by itself. Every access goes through one mutex.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ActionError;

/// A page handle shared with the browser process.
pub trait TabHandle: Clone + Send + Sync + 'static {
    /// Stable identifier of the underlying browser target.
    fn tab_id(&self) -> String;
}

/// Change reported by the browser outside the control loop.
#[derive(Debug, Clone)]
pub enum TabEvent<H> {
    Opened(H),
    Closed(String),
}

/// Counts exposed to the loop without handing out handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TabSummary {
    pub count: usize,
    pub active: Option<usize>,
    /// Incremented on every mutation of the tab list or active index.
    pub generation: u64,
}

struct TabState<H> {
    tabs: Vec<H>,
    active: usize,
    generation: u64,
}

impl<H: TabHandle> TabState<H> {
    fn position(&self, tab_id: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.tab_id() == tab_id)
    }

    fn push_active(&mut self, tab: H) -> usize {
        self.tabs.push(tab);
        self.active = self.tabs.len() - 1;
        self.generation += 1;
        self.active
    }

    fn remove(&mut self, tab_id: &str) -> bool {
        let Some(index) = self.position(tab_id) else {
            return false;
        };
        self.tabs.remove(index);
        if index == self.active {
            self.active = 0;
        } else if index < self.active {
            self.active -= 1;
        }
        self.generation += 1;
        true
    }
}

pub struct TabSession<H> {
    state: Mutex<TabState<H>>,
}

impl<H: TabHandle> Default for TabSession<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: TabHandle> TabSession<H> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TabState {
                tabs: Vec::new(),
                active: 0,
                generation: 0,
            }),
        }
    }

    pub fn with_tab(tab: H) -> Self {
        let session = Self::new();
        session.open(tab);
        session
    }

    /// Register a new tab and make it active. Returns its index.
    ///
    /// A tab that is already known keeps its position and the active index is
    /// left alone, so a late duplicate event cannot steal focus.
    pub fn open(&self, tab: H) -> usize {
        let mut state = self.state.lock();
        if let Some(index) = state.position(&tab.tab_id()) {
            return index;
        }
        let index = state.push_active(tab);
        debug!(index, count = state.tabs.len(), "tab opened");
        index
    }

    pub fn switch_to(&self, index: usize) -> Result<H, ActionError> {
        let mut state = self.state.lock();
        let count = state.tabs.len();
        if index >= count {
            return Err(ActionError::TabOutOfRange { index, count });
        }
        if state.active != index {
            state.active = index;
            state.generation += 1;
        }
        Ok(state.tabs[index].clone())
    }

    /// Forget a closed tab. If it was active the first remaining tab takes over.
    pub fn close(&self, tab_id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.remove(tab_id);
        if removed {
            debug!(tab_id, remaining = state.tabs.len(), "tab closed");
        }
        removed
    }

    pub fn apply(&self, event: TabEvent<H>) {
        match event {
            TabEvent::Opened(tab) => {
                self.open(tab);
            }
            TabEvent::Closed(tab_id) => {
                self.close(&tab_id);
            }
        }
    }

    /// Bring the session in line with the browser's live tab list.
    ///
    /// Tabs missing from `live` are dropped; unknown ones are appended in
    /// order and the last of them becomes active.
    pub fn reconcile(&self, live: &[H]) {
        for event in self.diff(live) {
            self.apply(event);
        }
    }

    /// Events that would turn the current session into `live`.
    pub fn diff(&self, live: &[H]) -> Vec<TabEvent<H>> {
        let state = self.state.lock();
        let live_ids: Vec<String> = live.iter().map(TabHandle::tab_id).collect();
        let mut events: Vec<TabEvent<H>> = state
            .tabs
            .iter()
            .map(TabHandle::tab_id)
            .filter(|id| !live_ids.contains(id))
            .map(TabEvent::Closed)
            .collect();
        events.extend(
            live.iter()
                .filter(|tab| state.position(&tab.tab_id()).is_none())
                .cloned()
                .map(TabEvent::Opened),
        );
        events
    }

    /// The active tab, or an error once every tab is gone.
    pub fn active(&self) -> Result<H, ActionError> {
        let state = self.state.lock();
        state.tabs.get(state.active).cloned().ok_or(ActionError::NoTabs)
    }

    pub fn tab_count(&self) -> usize {
        self.state.lock().tabs.len()
    }

    pub fn active_index(&self) -> Option<usize> {
        let state = self.state.lock();
        (!state.tabs.is_empty()).then_some(state.active)
    }

    pub fn summary(&self) -> TabSummary {
        let state = self.state.lock();
        TabSummary {
            count: state.tabs.len(),
            active: (!state.tabs.is_empty()).then_some(state.active),
            generation: state.generation,
        }
    }

    pub fn handles(&self) -> Vec<H> {
        self.state.lock().tabs.clone()
    }

    /// Drop every tab, e.g. when the browser shuts down.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.tabs.clear();
        state.active = 0;
        state.generation += 1;
    }
}

/// Spawn a task applying tab events to `session` in arrival order.
///
/// The task ends when every sender has been dropped.
pub fn spawn_event_pump<H: TabHandle>(
    session: Arc<TabSession<H>>,
) -> (mpsc::UnboundedSender<TabEvent<H>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<TabEvent<H>>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            session.apply(event);
        }
        debug!("tab event pump stopped");
    });
    (tx, handle)
}
