mod common;

use browser_pilot::history::Outcome;
use browser_pilot::terminal;
use browser_pilot::types::TaskStatus;
use tokio_util::sync::CancellationToken;

use common::*;

async fn run_console(
    orch: &mut browser_pilot::orchestrator::TaskOrchestrator,
    input: &str,
) -> String {
    let mut out = Vec::new();
    terminal::run(orch, input.as_bytes(), &mut out, &CancellationToken::new())
        .await
        .unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_approval_prompt_accepts_yes() {
    let actuator = MockActuator::new();
    let decider = ScriptedDecider::new(vec![click("#delete-draft")]);
    let mut orch = orchestrator(&decider, &actuator);

    let output = run_console(&mut orch, "remove my old draft\nда\nexit\n").await;

    assert!(output.contains("About to click #delete-draft."));
    assert!(output.contains("Approve? [yes/no]: "));
    assert_eq!(actuator.calls(), vec!["click #delete-draft"]);
    assert_eq!(orch.task().unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_approval_prompt_denies_anything_else() {
    let actuator = MockActuator::new();
    let decider = ScriptedDecider::new(vec![click("#delete-draft")]);
    let mut orch = orchestrator(&decider, &actuator);

    run_console(&mut orch, "remove my old draft\nno thanks\n").await;

    assert!(actuator.calls().is_empty());
    assert_eq!(orch.task().unwrap().status, TaskStatus::Failed);
    assert!(matches!(
        orch.history().entries()[0].outcome,
        Outcome::Denied { .. }
    ));
}

#[tokio::test]
async fn test_question_answered_inline() {
    let actuator = MockActuator::new();
    let decider = ScriptedDecider::new(vec![ask_user("Which size?")]);
    let mut orch = orchestrator(&decider, &actuator);

    let output = run_console(&mut orch, "order a t-shirt\nmedium\nquit\n").await;

    assert!(output.contains("Your reply"));
    assert!(matches!(
        &orch.history().entries()[1].outcome,
        Outcome::Operator { reply } if reply == "medium"
    ));
    assert_eq!(orch.task().unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_end_of_input_leaves_task_waiting() {
    let actuator = MockActuator::new();
    let decider = ScriptedDecider::new(vec![ask_user("Which size?")]);
    let mut orch = orchestrator(&decider, &actuator);

    run_console(&mut orch, "order a t-shirt\n").await;

    assert_eq!(orch.task().unwrap().status, TaskStatus::WaitingOnUser);
}

#[tokio::test]
async fn test_continue_without_task() {
    let actuator = MockActuator::new();
    let decider = ScriptedDecider::new(vec![]);
    let mut orch = orchestrator(&decider, &actuator);

    let output = run_console(&mut orch, "continue\nexit\n").await;
    assert!(output.contains("Nothing to continue."));
    assert_eq!(decider.calls(), 0);
}

#[tokio::test]
async fn test_analyze_command() {
    let actuator = MockActuator::new();
    let decider = ScriptedDecider::new(vec![]);
    let mut orch = orchestrator(&decider, &actuator);

    let output = run_console(&mut orch, "analyze find prices\n").await;
    assert!(output.contains("about:blank is relevant to find prices"));
    assert!(orch.task().is_none());
}

#[tokio::test]
async fn test_cancelled_console_stops() {
    let actuator = MockActuator::new();
    let decider = ScriptedDecider::new(vec![navigate("https://example.com")]);
    let mut orch = orchestrator(&decider, &actuator);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut out = Vec::new();
    terminal::run(&mut orch, "do something\n".as_bytes(), &mut out, &cancel)
        .await
        .unwrap();
    assert!(actuator.calls().is_empty());
}
