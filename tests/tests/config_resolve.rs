//! Layered settings resolution against a real repo directory: defaults,
//! `codeloop.toml`, `CODELOOP_*` env vars, and CLI overrides, each
//! strictly overriding the layer beneath.

mod support;

use codeloop_core::config::{self, CliOverrides, TransportConfig};
use support::TestResult;

#[test]
fn repo_file_beats_defaults_and_cli_beats_repo_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("codeloop.toml"),
        "max_iterations = 12\nlog_level = \"debug\"\n",
    )?;

    let settings = config::resolve(dir.path(), &CliOverrides::default())?;
    assert_eq!(settings.max_iterations, 12);
    assert_eq!(settings.log_level, "debug");

    let cli = CliOverrides {
        max_iterations: Some(2),
        ..Default::default()
    };
    let settings = config::resolve(dir.path(), &cli)?;
    assert_eq!(settings.max_iterations, 2);
    assert_eq!(settings.log_level, "debug", "cli didn't touch log_level, repo file still wins");
    Ok(())
}

#[test]
fn browser_transport_carries_a_default_profile_dir_under_the_state_subdir() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cli = CliOverrides {
        transport_kind: Some("browser".to_string()),
        browser_url: Some("http://localhost:4444".to_string()),
        browser_page_url: Some("https://chat.example.com".to_string()),
        ..Default::default()
    };
    let settings = config::resolve(dir.path(), &cli)?;
    match settings.transport {
        TransportConfig::Browser { user_data_dir, headless, .. } => {
            assert!(user_data_dir.starts_with(dir.path()));
            assert!(headless, "headless defaults to true");
        }
        other => panic!("expected browser transport, got {other:?}"),
    }
    Ok(())
}

#[test]
fn log_backlog_count_has_a_sane_default() -> TestResult {
    let dir = tempfile::tempdir()?;
    let settings = config::resolve(dir.path(), &CliOverrides::default())?;
    assert!(settings.log_backlog_count > 0);
    assert_eq!(settings.log_backlog_count, config::DEFAULT_LOG_BACKLOG_COUNT);
    Ok(())
}
