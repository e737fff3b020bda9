//! Full bootstrap -> plan -> iterate -> finalize run, driven entirely
//! through fakes for the model transport, the verification command, and
//! event sink, against a real git repository.

mod support;

use std::time::Duration;

use codeloop_core::fs::OsFs;
use codeloop_core::orchestrator::{Orchestrator, RunConfig};
use codeloop_kernel::ports::{CancelToken, RunEvent};
use codeloop_kernel::scheduler::{RunBudget, RunState};
use support::{seed_blueprints, AlwaysOkCommand, RecordingEvents, ScriptedAgent, TestRepo, TestResult};

fn base_config(repo: &TestRepo) -> RunConfig {
    RunConfig {
        run_id: "test-run".to_string(),
        repo_root: repo.root().to_path_buf(),
        instructions: "add a greeting module".to_string(),
        branch_prefix: "codeloop".to_string(),
        verify_command: None,
        command_timeout: Duration::from_secs(30),
        conversation_window_pairs: 8,
        budget: RunBudget {
            max_iterations: 5,
            max_fix_attempts_per_step: 2,
        },
        manifest_max_lines: None,
        blueprint_goal: "ship a tiny greeting library".to_string(),
        push_remote: None,
        forced_iterations: None,
    }
}

#[test]
fn single_iteration_run_reaches_done_and_commits_the_patch() -> TestResult {
    let repo = TestRepo::init()?;
    seed_blueprints(&repo)?;

    let fs = OsFs;
    let vcs = repo.vcs()?;
    let agent = ScriptedAgent::new([
        r#"{"overview":"add a greeting module","suggested_run_command":null,"classifications":[{"path":"src/greeting.rs","class":"code"}],"estimated_iterations":1}"#,
        r#"{"op":"create","file":"src/greeting.rs","body":"pub fn greet() -> &'static str { \"hi\" }\n","status":"completed"}"#,
    ]);
    let command = AlwaysOkCommand;
    let events = RecordingEvents::new();
    let cancel = CancelToken::new();

    let orchestrator = Orchestrator::new(&fs, &vcs, &agent, &command, &events, cancel);
    let cfg = base_config(&repo);

    let outcome = tokio_test_block_on(orchestrator.run(&cfg))?;

    assert_eq!(outcome.final_state, RunState::Done);
    assert_eq!(outcome.iterations_completed, 1);
    assert!(repo.exists("src/greeting.rs"));
    assert!(!outcome.pushed, "no push_remote was configured");

    let recorded = events.events.lock().unwrap();
    assert!(recorded.iter().any(|e| matches!(e, RunEvent::RunFinished { ok: true })));
    Ok(())
}

#[test]
fn patch_cycle_retries_a_rejected_reply_before_giving_up() -> TestResult {
    let repo = TestRepo::init()?;
    seed_blueprints(&repo)?;

    let fs = OsFs;
    let vcs = repo.vcs()?;
    // The model's first patch-turn reply is malformed (missing `op`); the
    // orchestrator feeds that back as a correction request rather than
    // failing the run outright, and the second reply succeeds.
    let agent = ScriptedAgent::new([
        r#"{"overview":"add a greeting module","suggested_run_command":null,"classifications":[{"path":"src/greeting.rs","class":"code"}],"estimated_iterations":1}"#,
        r#"{"file":"src/greeting.rs","body":"nope","status":"completed"}"#,
        r#"{"op":"create","file":"src/greeting.rs","body":"pub fn greet() {}\n","status":"completed"}"#,
    ]);
    let command = AlwaysOkCommand;
    let events = RecordingEvents::new();
    let cancel = CancelToken::new();

    let orchestrator = Orchestrator::new(&fs, &vcs, &agent, &command, &events, cancel);
    let cfg = base_config(&repo);

    let outcome = tokio_test_block_on(orchestrator.run(&cfg))?;

    assert_eq!(outcome.final_state, RunState::Done);
    assert!(repo.exists("src/greeting.rs"));
    Ok(())
}

#[test]
fn forced_iterations_overrides_the_models_own_estimate() -> TestResult {
    let repo = TestRepo::init()?;
    seed_blueprints(&repo)?;

    let fs = OsFs;
    let vcs = repo.vcs()?;
    // The plan reply claims a single iteration is enough, but `--iterations 2`
    // forces a second one; two patch turns must be scripted or the run would
    // stop after the first.
    let agent = ScriptedAgent::new([
        r#"{"overview":"add a greeting module","suggested_run_command":null,"classifications":[{"path":"src/greeting.rs","class":"code"}],"estimated_iterations":1}"#,
        r#"{"op":"create","file":"src/greeting.rs","body":"pub fn greet() {}\n","status":"completed"}"#,
        r#"{"op":"create","file":"src/farewell.rs","body":"pub fn farewell() {}\n","status":"completed"}"#,
    ]);
    let command = AlwaysOkCommand;
    let events = RecordingEvents::new();
    let cancel = CancelToken::new();

    let orchestrator = Orchestrator::new(&fs, &vcs, &agent, &command, &events, cancel);
    let mut cfg = base_config(&repo);
    cfg.forced_iterations = Some(2);

    let outcome = tokio_test_block_on(orchestrator.run(&cfg))?;

    assert_eq!(outcome.final_state, RunState::Done);
    assert_eq!(outcome.iterations_completed, 2);
    assert!(repo.exists("src/greeting.rs"));
    assert!(repo.exists("src/farewell.rs"));
    Ok(())
}

/// Runs a future to completion on a fresh current-thread runtime, so this
/// integration crate doesn't need a `#[tokio::test]` dependency edge on
/// every file that only drives one async call.
fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("building current-thread tokio runtime")
        .block_on(fut)
}
