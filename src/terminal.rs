//! Line-oriented operator console.
//!
//! Every line is a new task, except `exit`/`quit`, `continue` (resume a task
//! left waiting) and `analyze <task>`. Approvals and questions raised by the
//! loop are answered inline.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;
use crate::orchestrator::{TaskOrchestrator, TaskOutcome};
use crate::types::TaskStatus;

/// Answers that approve a held action.
const AFFIRMATIVE: &[&str] = &["yes", "y", "да", "д"];

pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    AFFIRMATIVE.contains(&answer.as_str())
}

enum Command<'a> {
    Exit,
    Continue,
    Analyze(&'a str),
    Task(&'a str),
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let lower = line.to_lowercase();
    Some(match lower.as_str() {
        "exit" | "quit" => Command::Exit,
        "continue" => Command::Continue,
        _ => match line.split_once(char::is_whitespace) {
            Some((head, rest)) if head.eq_ignore_ascii_case("analyze") => {
                Command::Analyze(rest.trim())
            }
            _ => Command::Task(line),
        },
    })
}

async fn read_line<R>(lines: &mut Lines<R>, cancel: &CancellationToken) -> anyhow::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        line = lines.next_line() => Ok(line?),
    }
}

/// Run the console until `exit`, end of input or cancellation.
pub async fn run<R, W>(
    orchestrator: &mut TaskOrchestrator,
    input: R,
    out: &mut W,
    cancel: &CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    if let Some(task) = orchestrator.task() {
        if task.status == TaskStatus::WaitingOnUser {
            writeln!(
                out,
                "Saved task \"{}\" is waiting. Type 'continue' to resume it.",
                task.description
            )?;
        }
    }
    writeln!(out, "Enter a task, or 'exit' to quit.")?;

    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = read_line(&mut lines, cancel).await? else {
            break;
        };

        let result = match parse_command(&line) {
            None => continue,
            Some(Command::Exit) => break,
            Some(Command::Analyze(task)) => {
                match orchestrator.analyze(task, cancel).await {
                    Ok(analysis) => writeln!(out, "{analysis}")?,
                    Err(e) => writeln!(out, "Analysis failed: {e}")?,
                }
                continue;
            }
            Some(Command::Continue) => orchestrator.resume(None, cancel).await,
            Some(Command::Task(description)) => orchestrator.run_task(description, cancel).await,
        };

        if !settle(orchestrator, result, &mut lines, out, cancel).await? {
            break;
        }
    }

    debug!("console stopped");
    Ok(())
}

/// Drive a result until the task leaves the waiting states. Returns false
/// when the console should stop.
async fn settle<R, W>(
    orchestrator: &mut TaskOrchestrator,
    mut result: Result<TaskOutcome, TaskError>,
    lines: &mut Lines<R>,
    out: &mut W,
    cancel: &CancellationToken,
) -> anyhow::Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        result = match result {
            Ok(TaskOutcome::Completed { .. }) => return Ok(true),
            Ok(TaskOutcome::AwaitingApproval(pending)) => {
                writeln!(out, "About to {}.", pending.intent.description())?;
                if let Some(reason) = &pending.verdict.reason {
                    writeln!(out, "Risk: {reason}")?;
                }
                write!(out, "Approve? [yes/no]: ")?;
                out.flush()?;
                let Some(answer) = read_line(lines, cancel).await? else {
                    return Ok(false);
                };
                orchestrator
                    .resolve_approval(is_affirmative(&answer), cancel)
                    .await
            }
            Ok(TaskOutcome::AwaitingUserInput { .. }) => {
                write!(out, "Your reply ('continue' to let the agent go on): ")?;
                out.flush()?;
                let Some(reply) = read_line(lines, cancel).await? else {
                    return Ok(false);
                };
                orchestrator.resume(Some(&reply), cancel).await
            }
            Err(TaskError::Cancelled) => return Ok(false),
            Err(TaskError::NoActiveTask) => {
                writeln!(out, "Nothing to continue.")?;
                return Ok(true);
            }
            Err(_) => return Ok(true),
        };
    }
}
