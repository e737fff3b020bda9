//! Resume records and plan persistence against a real repo: a resume
//! record pointing at a commit that's no longer `HEAD` reconciles to "no
//! state" rather than silently resuming from stale progress.

mod support;

use codeloop_core::state::{FileStateStore, INITIAL_PLAN_NAME};
use codeloop_kernel::plan::{FileClass, FileClassification, IterationPlan};
use codeloop_kernel::ports::SchedulerStore;
use codeloop_kernel::resume::{reconcile, ResumeRecord};
use support::{TestRepo, TestResult};

#[test]
fn stale_resume_record_reconciles_to_none() -> TestResult {
    let record = ResumeRecord::new("run-1".to_string(), "src/main.rs".to_string(), "deadbeef".to_string(), 2);
    assert!(reconcile(Some(record), Some("00000000")).is_none());
    Ok(())
}

#[test]
fn matching_resume_record_survives_reconciliation() -> TestResult {
    let record = ResumeRecord::new("run-1".to_string(), "src/main.rs".to_string(), "deadbeef".to_string(), 2);
    let reconciled = reconcile(Some(record.clone()), Some("deadbeef")).expect("should survive");
    assert_eq!(reconciled.run_id, record.run_id);
    Ok(())
}

#[test]
fn resume_record_round_trips_through_file_state_store() -> TestResult {
    let repo = TestRepo::init()?;
    let fs = repo.fs();
    let store = FileStateStore::new(&fs, repo.root());

    assert!(store.load("run-1")?.is_none());

    let record = ResumeRecord::new("run-1".to_string(), "src/main.rs".to_string(), repo.head_sha()?, 0);
    store.save(&record)?;

    let loaded = store.load("run-1")?.expect("just-saved record should load");
    assert_eq!(loaded.last_commit, record.last_commit);
    Ok(())
}

#[test]
fn plan_persists_as_json_and_a_regenerated_markdown_twin() -> TestResult {
    let repo = TestRepo::init()?;
    let fs = repo.fs();
    let store = FileStateStore::new(&fs, repo.root());

    let plan = IterationPlan {
        overview: "add a greeting module".to_string(),
        suggested_run_command: Some("cargo test".to_string()),
        classifications: vec![FileClassification {
            path: "src/greeting.rs".to_string(),
            class: FileClass::Code,
        }],
        estimated_iterations: 2,
    };
    store.save_plan(INITIAL_PLAN_NAME, &plan)?;

    let loaded = store
        .load_plan(INITIAL_PLAN_NAME)?
        .expect("just-saved plan should load");
    assert_eq!(loaded.overview, plan.overview);
    assert_eq!(loaded.estimated_iterations, 2);

    let markdown_path = repo
        .root()
        .join(".codeloop")
        .join(format!("{INITIAL_PLAN_NAME}.md"));
    assert!(markdown_path.exists());
    let rendered = std::fs::read_to_string(markdown_path)?;
    assert!(rendered.contains("greeting module"));
    Ok(())
}
