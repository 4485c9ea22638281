//! The task-execution control loop.
//!
//! One iteration: observe the active tab, ask the decider for an intent,
//! classify it, execute it if it is safe, record the outcome, repeat. The loop
//! suspends when the operator has to approve an action or answer a question
//! and fails once the iteration ceiling is reached.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::config::LoopConfig;
use crate::decider::Decider;
use crate::error::{ActionError, DeciderError, StorageError, TaskError};
use crate::events::AgentEvent;
use crate::gate::SecurityGate;
use crate::history::History;
use crate::storage::{SavedTask, StateStore};
use crate::tabs::TabSummary;
use crate::types::{
    ActionIntent, ActionKind, ActionName, ActionResult, PageSnapshot, PendingApproval, Task,
    TaskStatus,
};

/// Replies that mean the decider considers the task done, English and Russian.
const COMPLETION_KEYWORDS: &[&str] = &[
    "task complete",
    "done",
    "complete",
    "finished",
    "выполнено",
    "готово",
    "завершено",
    "сделано",
];

/// Characters of page text returned to the decider by `extract`.
const EXTRACT_MAX_CHARS: usize = 1500;

/// Whether a free-text reply signals that the task is finished.
pub fn is_completion_message(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return true;
    }
    COMPLETION_KEYWORDS.iter().any(|k| text == *k || text.contains(k))
}

/// How an invocation of the loop ended without failing.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { summary: String },
    /// Suspended: the intent was not executed and waits for the operator.
    AwaitingApproval(PendingApproval),
    /// Suspended: the decider needs an answer from the operator.
    AwaitingUserInput { message: String },
}

/// A snapshot together with the tab generation it was taken under.
struct Observed {
    snapshot: PageSnapshot,
    generation: u64,
}

pub struct TaskOrchestrator {
    decider: Arc<dyn Decider>,
    actuator: Arc<dyn Actuator>,
    gate: SecurityGate,
    config: LoopConfig,
    store: Option<StateStore>,
    events: Option<broadcast::Sender<AgentEvent>>,
    task: Option<Task>,
    history: History,
    pending: Option<PendingApproval>,
    steps: usize,
}

impl TaskOrchestrator {
    pub fn new(decider: Arc<dyn Decider>, actuator: Arc<dyn Actuator>, config: LoopConfig) -> Self {
        Self {
            decider,
            actuator,
            gate: SecurityGate::new(),
            config,
            store: None,
            events: None,
            task: None,
            history: History::new(),
            pending: None,
            steps: 0,
        }
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn pending_approval(&self) -> Option<&PendingApproval> {
        self.pending.as_ref()
    }

    /// Start a new task. Any previous task and its history are discarded.
    pub async fn run_task(
        &mut self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, TaskError> {
        let task = Task::new(description.trim());
        info!(task_id = %task.id, task = %task.description, "starting task");
        self.emit(AgentEvent::TaskStarted {
            task: task.description.clone(),
        });
        self.history.clear();
        self.pending = None;
        self.steps = 0;
        self.task = Some(task);
        self.set_status(TaskStatus::InProgress);

        let result = self.run_loop(None, cancel).await;
        self.conclude(result).await
    }

    /// Re-enter the loop for a task waiting on the operator.
    ///
    /// A reply other than `continue` is recorded in the history first.
    pub async fn resume(
        &mut self,
        reply: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, TaskError> {
        if self.pending.is_some() {
            return Err(TaskError::ApprovalPending);
        }
        match &self.task {
            Some(task) if task.status == TaskStatus::WaitingOnUser => {}
            _ => return Err(TaskError::NoActiveTask),
        }

        if let Some(reply) = reply
            .map(str::trim)
            .filter(|r| !r.is_empty() && !r.eq_ignore_ascii_case("continue"))
        {
            self.history.record_operator_reply(reply);
        }
        info!("resuming task");
        self.set_status(TaskStatus::InProgress);

        let result = self.run_loop(None, cancel).await;
        self.conclude(result).await
    }

    /// Settle the pending approval. Approval executes the held intent and
    /// resumes the loop; denial ends the task.
    pub async fn resolve_approval(
        &mut self,
        approved: bool,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, TaskError> {
        let pending = self.pending.take().ok_or(TaskError::NoPendingApproval)?;

        if !approved {
            info!(action = %pending.intent.name(), "operator denied action");
            self.history
                .record_denial(&pending.intent, "operator declined the action");
            let result = Err(TaskError::ApprovalDenied(pending.intent.description()));
            return self.conclude(result).await;
        }

        info!(action = %pending.intent.name(), "operator approved action");
        self.set_status(TaskStatus::InProgress);
        let result = match self
            .execute_and_record(pending.intent.into_approved(), cancel)
            .await
        {
            Ok(observed) => self.run_loop(observed, cancel).await,
            Err(err) => Err(err),
        };
        self.conclude(result).await
    }

    /// Ask the decider to describe the current page. Not part of the loop.
    pub async fn analyze(&self, task: &str, cancel: &CancellationToken) -> Result<String, TaskError> {
        let observed = self.observe(cancel).await?;
        let timeout = self.config.request_timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
            reply = tokio::time::timeout(timeout, self.decider.analyze_page(&observed.snapshot, task)) => {
                match reply {
                    Ok(reply) => reply.map_err(TaskError::from),
                    Err(_) => Err(DeciderError::Timeout(timeout).into()),
                }
            }
        }
    }

    /// Load the last task if it was left waiting on the operator.
    pub fn restore(&mut self) -> Result<Option<&Task>, StorageError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(saved) = store.load_task()? else {
            return Ok(None);
        };
        if saved.task.status != TaskStatus::WaitingOnUser {
            return Ok(None);
        }
        info!(task_id = %saved.task.id, entries = saved.history.len(), "restored waiting task");
        self.history = History::from_entries(saved.history);
        self.task = Some(saved.task);
        Ok(self.task.as_ref())
    }

    /// Hand the stored browser session, if any, to the actuator.
    pub async fn import_session(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load_session() {
            Ok(Some(blob)) => match self.actuator.import_session(&blob).await {
                Ok(()) => info!(bytes = blob.len(), "browser session restored"),
                Err(e) => warn!("could not restore browser session: {e}"),
            },
            Ok(None) => debug!("no stored browser session"),
            Err(e) => warn!("could not read browser session: {e}"),
        }
    }

    /// Flush the browser session and the current task to disk. Best effort.
    pub async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let export = tokio::time::timeout(self.config.action_timeout, self.actuator.export_session());
        match export.await {
            Ok(Ok(blob)) => {
                if let Err(e) = store.save_session(&blob) {
                    warn!("failed to save browser session: {e}");
                }
            }
            Ok(Err(e)) => warn!("failed to export browser session: {e}"),
            Err(_) => warn!(
                "browser session export timed out after {:?}",
                self.config.action_timeout
            ),
        }
        if let Some(task) = &self.task {
            let saved = SavedTask {
                task: task.clone(),
                history: self.history.entries().to_vec(),
            };
            if let Err(e) = store.save_task(&saved) {
                warn!("failed to save history: {e}");
            }
        }
    }

    async fn run_loop(
        &mut self,
        mut cached: Option<Observed>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, TaskError> {
        let max = self.config.max_iterations;

        for iteration in 1..=max {
            if cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }

            let observed = self.current_snapshot(cached.take(), cancel).await?;
            let snapshot = with_tab_note(&observed.snapshot, self.actuator.tabs());
            let vocabulary = self.history.offered_vocabulary(&self.config.suppression);

            debug!(iteration, url = %snapshot.url, "deciding next action");
            self.emit(AgentEvent::Thinking { iteration });
            let Some(intent) = self.decide(&snapshot, &vocabulary, cancel).await? else {
                return Ok(TaskOutcome::Completed {
                    summary: "the decider reported the task complete".to_string(),
                });
            };
            debug!(action = %intent.name(), reasoning = %intent.reasoning, "decider chose");

            match &intent.kind {
                ActionKind::Complete { summary } => {
                    return Ok(TaskOutcome::Completed {
                        summary: summary.clone(),
                    });
                }
                ActionKind::AskUser { question } if is_completion_message(question) => {
                    return Ok(TaskOutcome::Completed {
                        summary: question.clone(),
                    });
                }
                ActionKind::AskUser { question } => {
                    self.history.record_question(question.clone());
                    return Ok(TaskOutcome::AwaitingUserInput {
                        message: question.clone(),
                    });
                }
                _ => {}
            }

            if !vocabulary.contains(&intent.name()) {
                warn!(action = %intent.name(), "decider chose an action that was not offered");
                self.history.record_failure(
                    &intent,
                    format!("action {} is not available right now", intent.name()),
                    Vec::new(),
                );
                cached = Some(observed);
                continue;
            }

            let verdict = self.gate.classify(&intent, &snapshot);
            if verdict.requires_approval {
                info!(
                    action = %intent.name(),
                    reason = verdict.reason.as_deref().unwrap_or(""),
                    "action requires approval"
                );
                let pending = PendingApproval {
                    intent,
                    verdict,
                    page_url: snapshot.url.clone(),
                };
                self.pending = Some(pending.clone());
                return Ok(TaskOutcome::AwaitingApproval(pending));
            }

            cached = self.execute_and_record(intent, cancel).await?;
        }

        Err(TaskError::MaxIterationsExceeded(max))
    }

    /// Reuse the post-action snapshot unless the tabs changed since it was taken.
    async fn current_snapshot(
        &self,
        cached: Option<Observed>,
        cancel: &CancellationToken,
    ) -> Result<Observed, TaskError> {
        if let Some(observed) = cached {
            if observed.generation == self.actuator.tabs().generation {
                return Ok(observed);
            }
            debug!("tabs changed since last snapshot; observing again");
        }
        self.observe(cancel).await
    }

    async fn observe(&self, cancel: &CancellationToken) -> Result<Observed, TaskError> {
        let generation = self.actuator.tabs().generation;
        let timeout = self.config.snapshot_timeout;
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => return Err(TaskError::Cancelled),
            result = tokio::time::timeout(timeout, self.actuator.extract_snapshot()) => match result {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e)) => return Err(TaskError::Observation(e)),
                Err(_) => return Err(TaskError::Observation(ActionError::Timeout(timeout))),
            },
        };
        Ok(Observed {
            snapshot,
            generation,
        })
    }

    async fn decide(
        &self,
        snapshot: &PageSnapshot,
        vocabulary: &[ActionName],
        cancel: &CancellationToken,
    ) -> Result<Option<ActionIntent>, TaskError> {
        let task = self.task.as_ref().ok_or(TaskError::NoActiveTask)?;
        let timeout = self.config.request_timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
            reply = tokio::time::timeout(
                timeout,
                self.decider.decide(task, snapshot, &self.history, vocabulary),
            ) => match reply {
                Ok(reply) => reply.map_err(TaskError::from),
                Err(_) => Err(DeciderError::Timeout(timeout).into()),
            },
        }
    }

    /// Execute one intent and append its outcome to the history.
    ///
    /// Action failures are absorbed; only cancellation is returned as an error.
    async fn execute_and_record(
        &mut self,
        intent: ActionIntent,
        cancel: &CancellationToken,
    ) -> Result<Option<Observed>, TaskError> {
        self.steps += 1;
        let description = intent.description();
        info!(step = self.steps, "{description}");
        self.emit(AgentEvent::Step {
            number: self.steps,
            description: description.clone(),
        });

        let (result, observed) = self.execute(&intent, cancel).await?;
        if result.success {
            self.history.record_success(&intent, result.message);
            return Ok(observed);
        }

        let error = result
            .error
            .unwrap_or_else(|| ActionError::Transport(result.message.clone()));
        warn!(step = self.steps, "action failed: {error}");

        let fresh = match self.observe(cancel).await {
            Ok(observed) => Some(observed),
            Err(TaskError::Cancelled) => return Err(TaskError::Cancelled),
            Err(e) => {
                warn!("could not refresh page after failure: {e}");
                None
            }
        };
        let candidates = match &fresh {
            Some(observed) if error.is_unresolved_selector() => observed
                .snapshot
                .candidate_selectors(self.config.candidate_limit),
            _ => Vec::new(),
        };
        self.history
            .record_failure(&intent, error.to_string(), candidates);
        self.emit(AgentEvent::StepError {
            message: error.to_string(),
        });

        self.pause(self.config.failure_delay, cancel).await?;
        Ok(fresh)
    }

    /// Run the intent against the actuator, let the page settle and take the
    /// refreshed snapshot that successful results carry.
    async fn execute(
        &self,
        intent: &ActionIntent,
        cancel: &CancellationToken,
    ) -> Result<(ActionResult, Option<Observed>), TaskError> {
        if let Err(e) = intent.kind.validate() {
            return Ok((ActionResult::failed(e), None));
        }

        let budget = match intent.kind {
            ActionKind::Wait { seconds } => self
                .config
                .action_timeout
                .saturating_add(Duration::from_secs(seconds)),
            _ => self.config.action_timeout,
        };
        let performed = tokio::select! {
            _ = cancel.cancelled() => return Err(TaskError::Cancelled),
            result = tokio::time::timeout(budget, self.perform(&intent.kind)) => result,
        };
        let message = match performed {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return Ok((ActionResult::failed(e), None)),
            Err(_) => return Ok((ActionResult::failed(ActionError::Timeout(budget)), None)),
        };

        self.pause(self.config.settle_delay, cancel).await?;
        match self.observe(cancel).await {
            Ok(observed) => {
                let result = ActionResult::succeeded(message, observed.snapshot.clone());
                Ok((result, Some(observed)))
            }
            Err(TaskError::Observation(e)) => Ok((ActionResult::failed(e), None)),
            Err(e) => Err(e),
        }
    }

    async fn perform(&self, kind: &ActionKind) -> Result<String, ActionError> {
        let actuator = &self.actuator;
        match kind {
            ActionKind::Navigate { url } => {
                actuator.navigate(url).await?;
                Ok(format!("navigated to {url}"))
            }
            ActionKind::Click { selector } => {
                actuator.click(selector).await?;
                Ok(format!("clicked {selector}"))
            }
            ActionKind::TypeText { selector, text } => {
                actuator.type_text(selector, text).await?;
                Ok(format!("typed {} characters into {selector}", text.chars().count()))
            }
            ActionKind::Scroll { direction, amount } => {
                actuator.scroll(*direction, *amount).await?;
                Ok("scrolled".to_string())
            }
            ActionKind::Extract => {
                let snapshot = actuator.extract_snapshot().await?;
                let text: String = snapshot.visible_text.chars().take(EXTRACT_MAX_CHARS).collect();
                Ok(format!("page text: {text}"))
            }
            ActionKind::Wait { seconds } => {
                actuator.wait(Duration::from_secs(*seconds)).await?;
                Ok(format!("waited {seconds}s"))
            }
            ActionKind::OpenTab { url } => {
                actuator.open_tab(url.as_deref()).await?;
                Ok(format!("opened tab {}", actuator.active_tab().unwrap_or_default()))
            }
            ActionKind::SwitchTab { index } => {
                actuator.switch_tab(*index).await?;
                Ok(format!("switched to tab {index}"))
            }
            ActionKind::Complete { .. } | ActionKind::AskApproval { .. } | ActionKind::AskUser { .. } => {
                Err(ActionError::Validation(format!(
                    "{} is not a browser action",
                    kind.name()
                )))
            }
        }
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), TaskError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Record the final status, report it and flush state.
    async fn conclude(
        &mut self,
        result: Result<TaskOutcome, TaskError>,
    ) -> Result<TaskOutcome, TaskError> {
        let (status, reason) = match &result {
            Ok(TaskOutcome::Completed { summary }) => {
                info!(summary = %summary, "task completed");
                self.emit(AgentEvent::TaskComplete {
                    summary: summary.clone(),
                });
                (TaskStatus::Completed, summary.clone())
            }
            Ok(TaskOutcome::AwaitingApproval(pending)) => {
                self.emit(AgentEvent::ApprovalRequired {
                    description: pending.intent.description(),
                    reason: pending.verdict.reason.clone().unwrap_or_default(),
                });
                (
                    TaskStatus::WaitingOnUser,
                    format!("awaiting approval for {}", pending.intent.description()),
                )
            }
            Ok(TaskOutcome::AwaitingUserInput { message }) => {
                self.emit(AgentEvent::InputRequired {
                    message: message.clone(),
                });
                (TaskStatus::WaitingOnUser, message.clone())
            }
            Err(err) => {
                warn!("task ended: {err}");
                self.emit(AgentEvent::TaskError {
                    message: err.to_string(),
                });
                (TaskStatus::Failed, err.to_string())
            }
        };
        if let Some(task) = self.task.as_mut() {
            task.status = status;
            task.reason = Some(reason);
        }

        if matches!(result, Err(TaskError::Cancelled)) {
            if tokio::time::timeout(self.config.shutdown_grace, self.persist())
                .await
                .is_err()
            {
                warn!("state flush did not finish within the grace period");
            }
        } else {
            self.persist().await;
        }
        result
    }

    fn set_status(&mut self, status: TaskStatus) {
        if let Some(task) = self.task.as_mut() {
            task.status = status;
            task.reason = None;
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Tell the decider about other tabs when there is more than one.
fn with_tab_note(snapshot: &PageSnapshot, tabs: TabSummary) -> PageSnapshot {
    let mut snapshot = snapshot.clone();
    if tabs.count > 1 {
        snapshot.description.push_str(&format!(
            "\n\nOpen tabs: {}. Active tab: {} (0 is the first). Use switch_tab to change tabs.",
            tabs.count,
            tabs.active.unwrap_or_default()
        ));
    }
    snapshot
}
