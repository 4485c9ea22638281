//! Runtime configuration.
//!
//! Everything the loop and its collaborators need is passed in explicitly
//! through these structs; nothing reads the environment after start-up.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// History windows used to drop actions from the offered vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct SuppressionPolicy {
    /// An `extract` within this many latest entries suppresses `extract`.
    pub extract_window: usize,
    /// Window inspected for repeated scrolling.
    pub scroll_window: usize,
    /// Number of scrolls inside `scroll_window` that suppresses `scroll`.
    pub scroll_threshold: usize,
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self {
            extract_window: 3,
            scroll_window: 5,
            scroll_threshold: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Decide/execute cycles allowed per invocation.
    pub max_iterations: usize,
    pub suppression: SuppressionPolicy,
    /// Pause after a successful action so the page can settle.
    pub settle_delay: Duration,
    /// Pause after a failed action.
    pub failure_delay: Duration,
    pub request_timeout: Duration,
    pub action_timeout: Duration,
    pub snapshot_timeout: Duration,
    /// How many visible selectors accompany an unresolved-selector failure.
    pub candidate_limit: usize,
    /// Bound on flushing state after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            suppression: SuppressionPolicy::default(),
            settle_delay: Duration::from_millis(500),
            failure_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            action_timeout: Duration::from_secs(30),
            snapshot_timeout: Duration::from_secs(30),
            candidate_limit: 10,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeciderConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl DeciderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: 0.2,
            max_tokens: 4000,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    /// DevTools endpoint of an already running Chrome to attach to.
    pub debug_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    /// Persistent profile directory so logins survive restarts.
    pub profile_dir: PathBuf,
    pub element_timeout: Duration,
    pub tab_poll_interval: Duration,
}

impl BrowserConfig {
    pub fn new(state_dir: &std::path::Path) -> Self {
        Self {
            headless: false,
            debug_url: None,
            chrome_path: None,
            profile_dir: state_dir.join("profile"),
            element_timeout: Duration::from_secs(5),
            tab_poll_interval: Duration::from_millis(250),
        }
    }
}

/// Default location for persisted state: `~/.browser_pilot`.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".browser_pilot")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.suppression.extract_window, 3);
        assert_eq!(config.suppression.scroll_window, 5);
        assert_eq!(config.suppression.scroll_threshold, 3);
        assert_eq!(config.candidate_limit, 10);
    }

    #[test]
    fn test_profile_dir_under_state_dir() {
        let config = BrowserConfig::new(std::path::Path::new("/tmp/pilot"));
        assert!(config.profile_dir.ends_with("pilot/profile"));
        assert!(!config.headless);
    }

    #[test]
    fn test_default_state_dir() {
        assert!(default_state_dir().ends_with(".browser_pilot"));
    }
}
