//! End-to-end patch lifecycle: a raw envelope string goes through the
//! validator and the applier, and the result lands as a real git commit in
//! a throwaway repo.

mod support;

use codeloop_kernel::patch;
use support::{TestRepo, TestResult};

#[test]
fn create_then_update_then_delete_round_trips_through_git() -> TestResult {
    let repo = TestRepo::init()?;
    let fs = repo.fs();
    let vcs = repo.vcs()?;

    let create = patch::validate(
        r#"{"op":"create","file":"src/greeting.txt","body":"hello\n","status":"completed"}"#,
    )?;
    let outcome = codeloop_core::apply::apply(&fs, &vcs, repo.root(), &create)?;
    assert_eq!(outcome.touched, vec!["src/greeting.txt".to_string()]);
    vcs.commit("create: src/greeting.txt")?;
    assert_eq!(repo.read("src/greeting.txt")?, "hello\n");

    let update = patch::validate(
        r#"{"op":"update","file":"src/greeting.txt","body":"hello again\n","status":"completed"}"#,
    )?;
    codeloop_core::apply::apply(&fs, &vcs, repo.root(), &update)?;
    vcs.commit("update: src/greeting.txt")?;
    assert_eq!(repo.read("src/greeting.txt")?, "hello again\n");

    let delete = patch::validate(
        r#"{"op":"delete","file":"src/greeting.txt","status":"completed"}"#,
    )?;
    codeloop_core::apply::apply(&fs, &vcs, repo.root(), &delete)?;
    vcs.commit("delete: src/greeting.txt")?;
    assert!(!repo.exists("src/greeting.txt"));

    Ok(())
}

#[test]
fn unsafe_path_is_rejected_before_it_ever_touches_the_filesystem() -> TestResult {
    let raw = r#"{"op":"create","file":"../outside.txt","body":"x","status":"completed"}"#;
    let err = patch::validate(raw).expect_err("escaping path must be rejected");
    assert!(matches!(err, patch::ValidationError::UnsafePath(_)));
    Ok(())
}

#[test]
fn update_on_a_locally_dirty_file_is_a_precondition_failure() -> TestResult {
    let repo = TestRepo::init()?;
    let fs = repo.fs();
    let vcs = repo.vcs()?;

    repo.write("README.md", "# seed\nuncommitted local edit\n")?;

    let update = patch::validate(
        r#"{"op":"update","file":"README.md","body":"model edit\n","status":"completed"}"#,
    )?;
    let err = codeloop_core::apply::apply(&fs, &vcs, repo.root(), &update).unwrap_err();
    assert!(matches!(
        err,
        codeloop_kernel::error::RunError::PreconditionFailure { .. }
    ));
    Ok(())
}

#[test]
fn rename_moves_the_file_and_stages_both_paths() -> TestResult {
    let repo = TestRepo::init()?;
    let fs = repo.fs();
    let vcs = repo.vcs()?;

    let rename = patch::validate(
        r#"{"op":"rename","file":"README.md","target":"docs/README.md","status":"completed"}"#,
    )?;
    codeloop_core::apply::apply(&fs, &vcs, repo.root(), &rename)?;
    vcs.commit("rename: README.md -> docs/README.md")?;

    assert!(!repo.exists("README.md"));
    assert!(repo.exists("docs/README.md"));
    Ok(())
}

#[test]
fn chmod_sets_mode_from_the_closed_mode_set() -> TestResult {
    let repo = TestRepo::init()?;
    let fs = repo.fs();
    let vcs = repo.vcs()?;

    let chmod = patch::validate(
        r#"{"op":"chmod","file":"README.md","mode":"755","status":"completed"}"#,
    )?;
    codeloop_core::apply::apply(&fs, &vcs, repo.root(), &chmod)?;
    vcs.commit("chmod: README.md")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = std::fs::metadata(repo.root().join("README.md"))?;
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
    }
    Ok(())
}
