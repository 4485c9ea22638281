//! Browser task automation: a decide/act loop that drives Chrome toward a
//! natural-language goal, holding risky actions for operator approval.

pub mod actuator;
pub mod brain;
pub mod config;
pub mod decider;
pub mod dom;
pub mod error;
pub mod events;
pub mod gate;
pub mod hands;
pub mod history;
pub mod orchestrator;
pub mod storage;
pub mod tabs;
pub mod terminal;
pub mod types;

pub use actuator::Actuator;
pub use config::{BrowserConfig, DeciderConfig, LoopConfig, SuppressionPolicy};
pub use decider::Decider;
pub use error::{ActionError, DeciderError, StorageError, TaskError};
pub use gate::{RiskLevel, SecurityGate, Verdict};
pub use history::{History, HistoryEntry, Outcome};
pub use orchestrator::{TaskOrchestrator, TaskOutcome};
pub use tabs::{TabEvent, TabHandle, TabSession, TabSummary};
pub use types::{ActionIntent, ActionKind, ActionName, PageSnapshot, Task, TaskStatus};
