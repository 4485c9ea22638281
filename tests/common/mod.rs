#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use browser_pilot::actuator::Actuator;
use browser_pilot::config::LoopConfig;
use browser_pilot::decider::Decider;
use browser_pilot::error::{ActionError, DeciderError};
use browser_pilot::history::History;
use browser_pilot::orchestrator::TaskOrchestrator;
use browser_pilot::tabs::{TabHandle, TabSession, TabSummary};
use browser_pilot::types::{
    ActionIntent, ActionKind, ActionName, InteractiveElement, PageSnapshot, ScrollDirection, Task,
};

pub fn fast_config() -> LoopConfig {
    LoopConfig {
        settle_delay: Duration::ZERO,
        failure_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        action_timeout: Duration::from_secs(5),
        snapshot_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(1),
        ..LoopConfig::default()
    }
}

pub fn orchestrator(decider: &Arc<ScriptedDecider>, actuator: &Arc<MockActuator>) -> TaskOrchestrator {
    TaskOrchestrator::new(decider.clone(), actuator.clone(), fast_config())
}

pub fn navigate(url: &str) -> ActionIntent {
    ActionIntent::new(ActionKind::Navigate { url: url.into() }, "open the page")
}

pub fn click(selector: &str) -> ActionIntent {
    ActionIntent::new(
        ActionKind::Click {
            selector: selector.into(),
        },
        "press it",
    )
}

pub fn scroll() -> ActionIntent {
    ActionIntent::new(
        ActionKind::Scroll {
            direction: ScrollDirection::Down,
            amount: 400,
        },
        "look further down",
    )
}

pub fn extract() -> ActionIntent {
    ActionIntent::new(ActionKind::Extract, "read the page")
}

pub fn ask_user(question: &str) -> ActionIntent {
    ActionIntent::new(
        ActionKind::AskUser {
            question: question.into(),
        },
        "",
    )
}

pub fn element(selector: &str, text: &str) -> InteractiveElement {
    InteractiveElement {
        tag: "button".into(),
        text: text.into(),
        selector: selector.into(),
        is_visible: true,
        is_clickable: true,
    }
}

/// What the decider was shown on one call.
#[derive(Debug, Clone)]
pub struct Seen {
    pub url: String,
    pub description: String,
    pub vocabulary: Vec<ActionName>,
    pub history_len: usize,
}

/// Replays a fixed list of replies. Once the list is exhausted it repeats
/// `fallback`, or reports completion when there is none.
#[derive(Default)]
pub struct ScriptedDecider {
    script: Mutex<VecDeque<Result<Option<ActionIntent>, DeciderError>>>,
    fallback: Option<ActionIntent>,
    delay: Option<Duration>,
    pub seen: Mutex<Vec<Seen>>,
}

impl ScriptedDecider {
    pub fn new(intents: Vec<ActionIntent>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(intents.into_iter().map(|i| Ok(Some(i))).collect()),
            ..Default::default()
        })
    }

    pub fn with_replies(replies: Vec<Result<Option<ActionIntent>, DeciderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    pub fn repeating(intent: ActionIntent) -> Arc<Self> {
        Arc::new(Self {
            fallback: Some(intent),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn push(&self, intent: ActionIntent) {
        self.script.lock().push_back(Ok(Some(intent)));
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn seen(&self, call: usize) -> Seen {
        self.seen.lock()[call].clone()
    }
}

#[async_trait]
impl Decider for ScriptedDecider {
    async fn decide(
        &self,
        _task: &Task,
        snapshot: &PageSnapshot,
        history: &History,
        vocabulary: &[ActionName],
    ) -> Result<Option<ActionIntent>, DeciderError> {
        self.seen.lock().push(Seen {
            url: snapshot.url.clone(),
            description: snapshot.description.clone(),
            vocabulary: vocabulary.to_vec(),
            history_len: history.len(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(reply) => reply,
            None => Ok(self.fallback.clone()),
        }
    }

    async fn analyze_page(&self, snapshot: &PageSnapshot, task: &str) -> Result<String, DeciderError> {
        Ok(format!("{} is relevant to {task}", snapshot.url))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockTab(pub String);

impl TabHandle for MockTab {
    fn tab_id(&self) -> String {
        self.0.clone()
    }
}

/// In-memory browser. Pages are looked up by URL; every call is recorded.
pub struct MockActuator {
    pub session: Arc<TabSession<MockTab>>,
    urls: Mutex<HashMap<String, String>>,
    pages: Mutex<HashMap<String, PageSnapshot>>,
    missing: Mutex<HashSet<String>>,
    popup_after_snapshot: Mutex<Option<String>>,
    popup_on_click: Mutex<HashMap<String, String>>,
    fail_snapshots: Mutex<bool>,
    hang_export: Mutex<bool>,
    next_tab: AtomicUsize,
    pub snapshots: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
    pub imported: Mutex<Option<Vec<u8>>>,
}

impl MockActuator {
    pub fn new() -> Arc<Self> {
        let actuator = Self {
            session: Arc::new(TabSession::new()),
            urls: Mutex::new(HashMap::new()),
            pages: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            popup_after_snapshot: Mutex::new(None),
            popup_on_click: Mutex::new(HashMap::new()),
            fail_snapshots: Mutex::new(false),
            hang_export: Mutex::new(false),
            next_tab: AtomicUsize::new(0),
            snapshots: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            imported: Mutex::new(None),
        };
        actuator.add_tab("about:blank");
        Arc::new(actuator)
    }

    fn add_tab(&self, url: &str) -> usize {
        let id = format!("tab-{}", self.next_tab.fetch_add(1, Ordering::SeqCst));
        self.urls.lock().insert(id.clone(), url.to_string());
        self.session.open(MockTab(id))
    }

    pub fn with_page(self: &Arc<Self>, page: PageSnapshot) -> Arc<Self> {
        self.pages.lock().insert(page.url.clone(), page);
        self.clone()
    }

    pub fn set_current_page(&self, page: PageSnapshot) {
        if let Ok(tab) = self.session.active() {
            self.urls.lock().insert(tab.0, page.url.clone());
        }
        self.pages.lock().insert(page.url.clone(), page);
    }

    pub fn missing_selector(&self, selector: &str) {
        self.missing.lock().insert(selector.to_string());
    }

    /// The page opens a tab right after the next snapshot is taken.
    pub fn popup_after_next_snapshot(&self, url: &str) {
        *self.popup_after_snapshot.lock() = Some(url.to_string());
    }

    /// Clicking `selector` makes the page open `url` in a new tab, which
    /// shows up only after the post-click snapshot.
    pub fn popup_on_click(&self, selector: &str, url: &str) {
        self.popup_on_click
            .lock()
            .insert(selector.to_string(), url.to_string());
    }

    pub fn fail_snapshots(&self) {
        *self.fail_snapshots.lock() = true;
    }

    /// Session export never returns.
    pub fn hang_export(&self) {
        *self.hang_export.lock() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn active_id(&self) -> Result<String, ActionError> {
        Ok(self.session.active()?.0)
    }

    fn current_url(&self) -> Result<String, ActionError> {
        let id = self.active_id()?;
        Ok(self.urls.lock().get(&id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn navigate(&self, url: &str) -> Result<(), ActionError> {
        self.record(format!("navigate {url}"));
        let id = self.active_id()?;
        self.urls.lock().insert(id, url.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), ActionError> {
        self.record(format!("click {selector}"));
        if self.missing.lock().contains(selector) {
            return Err(ActionError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        let popup = self.popup_on_click.lock().get(selector).cloned();
        if let Some(url) = popup {
            *self.popup_after_snapshot.lock() = Some(url);
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ActionError> {
        self.record(format!("type {selector} {text}"));
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<(), ActionError> {
        self.record(format!("scroll {direction:?} {amount}"));
        Ok(())
    }

    async fn extract_snapshot(&self) -> Result<PageSnapshot, ActionError> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        if *self.fail_snapshots.lock() {
            return Err(ActionError::Transport("page crashed".to_string()));
        }
        let url = self.current_url()?;
        let snapshot = self
            .pages
            .lock()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| PageSnapshot {
                url: url.clone(),
                title: url.clone(),
                ..Default::default()
            });
        let popup = self.popup_after_snapshot.lock().take();
        if let Some(popup) = popup {
            self.add_tab(&popup);
        }
        Ok(snapshot)
    }

    async fn open_tab(&self, url: Option<&str>) -> Result<(), ActionError> {
        self.record(format!("open_tab {}", url.unwrap_or("")));
        self.add_tab(url.unwrap_or("about:blank"));
        Ok(())
    }

    async fn switch_tab(&self, index: usize) -> Result<(), ActionError> {
        self.record(format!("switch_tab {index}"));
        self.session.switch_to(index)?;
        Ok(())
    }

    fn tabs(&self) -> TabSummary {
        self.session.summary()
    }

    async fn export_session(&self) -> Result<Vec<u8>, ActionError> {
        let hang = *self.hang_export.lock();
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(b"cookie=1".to_vec())
    }

    async fn import_session(&self, blob: &[u8]) -> Result<(), ActionError> {
        *self.imported.lock() = Some(blob.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), ActionError> {
        self.session.clear();
        Ok(())
    }
}
