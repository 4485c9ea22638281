//! Chrome actuator built on `headless_chrome`.
//!
//! `headless_chrome` is synchronous, so every browser call runs on the
//! blocking pool. Tabs the page opens or closes on its own are picked up by
//! a watcher that polls the browser's target list and feeds the differences
//! into the shared [`TabSession`].

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::config::BrowserConfig;
use crate::dom;
use crate::error::ActionError;
use crate::tabs::{TabEvent, TabHandle, TabSession, TabSummary, spawn_event_pump};
use crate::types::{PageSnapshot, ScrollDirection};

/// Cookie fields carried across restarts.
const COOKIE_FIELDS: &[&str] = &["name", "value", "domain", "path", "secure", "httpOnly", "expires"];

#[derive(Clone)]
pub struct ChromeTab(pub Arc<Tab>);

impl std::fmt::Debug for ChromeTab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChromeTab").field(&self.tab_id()).finish()
    }
}

impl TabHandle for ChromeTab {
    fn tab_id(&self) -> String {
        self.0.get_target_id().to_string()
    }
}

pub struct ChromeActuator {
    browser: Mutex<Option<Browser>>,
    session: Arc<TabSession<ChromeTab>>,
    config: BrowserConfig,
    watcher: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn transport(err: impl std::fmt::Display) -> ActionError {
    ActionError::Transport(err.to_string())
}

/// Run a synchronous browser call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ActionError>
where
    F: FnOnce() -> Result<T, ActionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ActionError::Transport(format!("browser call panicked: {e}")))?
}

fn live_tabs(browser: &Browser) -> Result<Vec<ChromeTab>, ActionError> {
    let tabs = browser
        .get_tabs()
        .lock()
        .map_err(|_| ActionError::Transport("tab list lock poisoned".to_string()))?;
    Ok(tabs.iter().cloned().map(ChromeTab).collect())
}

/// A tab reported closed by the first read is only closed if a second read
/// succeeded and still lacks it.
fn close_confirmed(current: Option<&[String]>, id: &str) -> bool {
    current.is_some_and(|ids| !ids.iter().any(|live| live == id))
}

fn launch_browser(config: &BrowserConfig) -> anyhow::Result<Browser> {
    if let Some(url) = &config.debug_url {
        info!(url = %url, "attaching to running Chrome");
        return Browser::connect(url.clone()).context("could not attach to Chrome");
    }

    std::fs::create_dir_all(&config.profile_dir)
        .with_context(|| format!("creating profile dir {}", config.profile_dir.display()))?;
    let options = LaunchOptions {
        headless: config.headless,
        path: config.chrome_path.clone(),
        user_data_dir: Some(config.profile_dir.clone()),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--password-store=basic"),
        ],
        idle_browser_timeout: Duration::from_secs(600),
        ..Default::default()
    };
    info!(profile = %config.profile_dir.display(), headless = config.headless, "launching Chrome");
    Browser::new(options).context("browser launch failed")
}

impl ChromeActuator {
    /// Attach to or launch Chrome and start tracking its tabs.
    pub async fn launch(config: BrowserConfig) -> anyhow::Result<Self> {
        let launch_config = config.clone();
        let (browser, initial) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let browser = launch_browser(&launch_config)?;
            let mut tabs = live_tabs(&browser)?;
            if tabs.is_empty() {
                tabs.push(ChromeTab(browser.new_tab().context("opening first tab")?));
            }
            Ok((browser, tabs))
        })
        .await
        .context("browser launch panicked")??;

        let session = Arc::new(TabSession::new());
        session.reconcile(&initial);
        info!(tabs = session.tab_count(), "Chrome ready");

        let actuator = Self {
            browser: Mutex::new(Some(browser.clone())),
            session,
            config,
            watcher: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };
        actuator.spawn_watcher(browser);
        Ok(actuator)
    }

    fn spawn_watcher(&self, browser: Browser) {
        let (tx, pump) = spawn_event_pump(self.session.clone());
        let session = self.session.clone();
        let token = self.watcher.clone();
        let poll = self.config.tab_poll_interval;

        let watcher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let live = match live_tabs(&browser) {
                    Ok(live) => live,
                    Err(e) => {
                        warn!("tab watcher: {e}");
                        continue;
                    }
                };
                let events = session.diff(&live);
                if events.is_empty() {
                    continue;
                }
                // A tab opened after `live` was read is not closed. Without a
                // second read no close is confirmed this tick.
                let current: Option<Vec<String>> = match live_tabs(&browser) {
                    Ok(tabs) => Some(tabs.iter().map(TabHandle::tab_id).collect()),
                    Err(e) => {
                        warn!("tab watcher: {e}");
                        None
                    }
                };
                for event in events {
                    if let TabEvent::Closed(id) = &event {
                        if !close_confirmed(current.as_deref(), id) {
                            continue;
                        }
                    }
                    debug!(?event, "tab change from browser");
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        self.tasks.lock().extend([watcher, pump]);
    }

    fn browser(&self) -> Result<Browser, ActionError> {
        self.browser
            .lock()
            .clone()
            .ok_or_else(|| ActionError::Transport("browser is closed".to_string()))
    }

    fn active(&self) -> Result<Arc<Tab>, ActionError> {
        Ok(self.session.active()?.0)
    }

    /// Wait for `selector` on the active tab and hand the tab to `f` once it resolves.
    async fn with_element<F>(&self, selector: &str, f: F) -> Result<(), ActionError>
    where
        F: FnOnce(&Arc<Tab>, &str) -> Result<(), ActionError> + Send + 'static,
    {
        let tab = self.active()?;
        let selector = selector.to_string();
        let timeout = self.config.element_timeout;
        blocking(move || {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(|_| ActionError::ElementNotFound {
                    selector: selector.clone(),
                })?;
            f(&tab, &selector)
        })
        .await
    }
}

#[async_trait]
impl Actuator for ChromeActuator {
    async fn navigate(&self, url: &str) -> Result<(), ActionError> {
        let tab = self.active()?;
        let url = url.to_string();
        blocking(move || {
            tab.navigate_to(&url).map_err(transport)?;
            tab.wait_until_navigated().map_err(transport)?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), ActionError> {
        self.with_element(selector, |tab, selector| {
            let element = tab.find_element(selector).map_err(|_| ActionError::ElementNotFound {
                selector: selector.to_string(),
            })?;
            element.click().map_err(transport)?;
            Ok(())
        })
        .await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ActionError> {
        let text = text.to_string();
        self.with_element(selector, move |tab, selector| {
            let element = tab.find_element(selector).map_err(|_| ActionError::ElementNotFound {
                selector: selector.to_string(),
            })?;
            element.click().map_err(transport)?;
            let literal = serde_json::to_string(selector).map_err(transport)?;
            tab.evaluate(
                &format!("(() => {{ const el = document.querySelector({literal}); if (el) el.value = ''; }})()"),
                false,
            )
            .map_err(transport)?;
            tab.type_str(&text).map_err(transport)?;
            Ok(())
        })
        .await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<(), ActionError> {
        let tab = self.active()?;
        let delta = match direction {
            ScrollDirection::Up => -i64::from(amount),
            ScrollDirection::Down => i64::from(amount),
        };
        blocking(move || {
            tab.evaluate(&format!("window.scrollBy(0, {delta})"), false)
                .map_err(transport)?;
            Ok(())
        })
        .await
    }

    async fn extract_snapshot(&self) -> Result<PageSnapshot, ActionError> {
        let browser = self.browser()?;
        let session = self.session.clone();
        blocking(move || {
            session.reconcile(&live_tabs(&browser)?);
            let tab = session.active()?.0;
            dom::capture_snapshot(&tab)
        })
        .await
    }

    async fn open_tab(&self, url: Option<&str>) -> Result<(), ActionError> {
        let browser = self.browser()?;
        let tab = blocking(move || browser.new_tab().map_err(transport)).await?;
        let index = self.session.open(ChromeTab(tab));
        info!(index, "opened tab");
        match url {
            Some(url) => self.navigate(url).await,
            None => Ok(()),
        }
    }

    async fn switch_tab(&self, index: usize) -> Result<(), ActionError> {
        let tab = self.session.switch_to(index)?.0;
        blocking(move || {
            tab.bring_to_front().map_err(transport)?;
            Ok(())
        })
        .await
    }

    fn tabs(&self) -> TabSummary {
        self.session.summary()
    }

    async fn export_session(&self) -> Result<Vec<u8>, ActionError> {
        let tab = self.active()?;
        blocking(move || {
            let cookies = tab.get_cookies().map_err(transport)?;
            serde_json::to_vec(&cookies).map_err(transport)
        })
        .await
    }

    async fn import_session(&self, blob: &[u8]) -> Result<(), ActionError> {
        let cookies = decode_cookies(blob)?;
        if cookies.is_empty() {
            return Ok(());
        }
        let tab = self.active()?;
        blocking(move || tab.set_cookies(cookies).map_err(transport)).await
    }

    async fn close(&self) -> Result<(), ActionError> {
        self.watcher.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.session.clear();
        if self.browser.lock().take().is_some() {
            info!("browser closed");
        }
        Ok(())
    }
}

/// Parse stored cookies, keeping only the fields that can be set again.
pub fn decode_cookies(blob: &[u8]) -> Result<Vec<CookieParam>, ActionError> {
    let stored: Vec<Value> = serde_json::from_slice(blob)
        .map_err(|e| ActionError::Transport(format!("malformed session: {e}")))?;
    stored
        .into_iter()
        .map(|cookie| {
            let kept: serde_json::Map<String, Value> = cookie
                .as_object()
                .into_iter()
                .flatten()
                .filter(|(key, _)| COOKIE_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            serde_json::from_value(Value::Object(kept))
                .map_err(|e| ActionError::Transport(format!("malformed cookie: {e}")))
        })
        .collect()
}
