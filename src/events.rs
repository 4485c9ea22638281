//! Progress events published while a task runs.

use std::fmt;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Events broadcast by the orchestrator to whoever is watching.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    TaskStarted { task: String },
    Thinking { iteration: usize },
    Step { number: usize, description: String },
    StepError { message: String },
    ApprovalRequired { description: String, reason: String },
    InputRequired { message: String },
    TaskComplete { summary: String },
    TaskError { message: String },
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentEvent::TaskStarted { task } => write!(f, "Starting task: {task}"),
            AgentEvent::Thinking { iteration } => write!(f, "Thinking... (iteration {iteration})"),
            AgentEvent::Step {
                number,
                description,
            } => write!(f, "Step {number}: {description}"),
            AgentEvent::StepError { message } => write!(f, "Error: {message}"),
            AgentEvent::ApprovalRequired {
                description,
                reason,
            } => write!(f, "Approval required for \"{description}\": {reason}"),
            AgentEvent::InputRequired { message } => write!(f, "Agent asks: {message}"),
            AgentEvent::TaskComplete { summary } => write!(f, "Done: {summary}"),
            AgentEvent::TaskError { message } => write!(f, "Task failed: {message}"),
        }
    }
}

pub fn channel() -> (broadcast::Sender<AgentEvent>, broadcast::Receiver<AgentEvent>) {
    broadcast::channel(64)
}

/// Print every event to stdout until the channel closes.
pub fn spawn_printer(mut rx: broadcast::Receiver<AgentEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(AgentEvent::Thinking { .. }) => {}
                Ok(event) => println!("{event}"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
