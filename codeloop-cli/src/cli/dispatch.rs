//! Turns parsed [`Cli`] arguments into a resolved [`Settings`], a concrete
//! set of port implementations, and a call into the orchestrator; maps the
//! result back onto the exit codes promised by the external interface.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use codeloop_core::config::{CliOverrides, Settings, TransportConfig};
use codeloop_core::fs::OsFs;
use codeloop_core::orchestrator::{Orchestrator, RunConfig, VerifyCommand};
use codeloop_core::transport::{BrowserTransport, HttpTransport, RetryingAgent};
use codeloop_core::vcs::GitVcs;
use codeloop_core::{command, config, walker};
use codeloop_kernel::ports::{AgentPort, CancelToken, EventSink, RunEvent};
use codeloop_kernel::scheduler::RunBudget;

use crate::cli::args::{Cli, Commands, GlobalOpts, IterateArgs, TransportModeArg};

struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: RunEvent) {
        match event {
            RunEvent::PlanCreated { steps } => {
                tracing::info!(steps, "plan created");
            }
            RunEvent::StepStarted { step_id } => tracing::info!(step_id, "step started"),
            RunEvent::PatchValidated { op, path } => {
                tracing::debug!(op, path, "patch validated")
            }
            RunEvent::PatchApplied { op, path } => tracing::info!(op, path, "patch applied"),
            RunEvent::CommandRun { command, succeeded } => {
                tracing::info!(command, succeeded, "verification command ran")
            }
            RunEvent::StepVerified { step_id } => tracing::info!(step_id, "step verified"),
            RunEvent::StepFailed { step_id, reason } => {
                tracing::warn!(step_id, reason, "step failed")
            }
            RunEvent::RunFinished { ok } => tracing::info!(ok, "run finished"),
        }
    }
}

/// Holds the non-blocking file writer's worker thread alive for the life of
/// the process; dropping it would silently stop flushing log lines to disk.
struct LoggingGuard(#[allow(dead_code)] Option<tracing_appender::non_blocking::WorkerGuard>);

fn verbosity_level(verbose: u8, settings_level: &str) -> String {
    match verbose {
        0 => settings_level.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Builds the process-wide subscriber: a pretty/JSON stderr layer always on,
/// plus a daily-rotating file sink (bounded by `log_backlog_count` files)
/// when `log_dir` is set.
fn init_logging(
    verbose: u8,
    json: bool,
    log_dir: Option<&Path>,
    log_backlog_count: usize,
    default_level: &str,
) -> LoggingGuard {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let level = verbosity_level(verbose, default_level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("warning: could not create log dir {}: {e}", dir.display());
            return None;
        }
        tracing_appender::rolling::Builder::new()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("codeloop")
            .filename_suffix("log")
            .max_log_files(log_backlog_count)
            .build(dir)
            .map_err(|e| eprintln!("warning: could not open rotating log file in {}: {e}", dir.display()))
            .ok()
    });

    match file_appender {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            if json {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).json())
                    .with(file_layer.json())
                    .try_init();
            } else {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                    .with(file_layer)
                    .try_init();
            }
            LoggingGuard(Some(guard))
        }
        None => {
            if json {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).json())
                    .try_init();
            } else {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                    .try_init();
            }
            LoggingGuard(None)
        }
    }
}

/// A local clone of a remote repo, removed from disk when dropped.
struct ResolvedRepo {
    path: PathBuf,
    _tempdir: Option<tempfile::TempDir>,
}

fn is_clone_url(raw: &str) -> bool {
    raw.starts_with("http://")
        || raw.starts_with("https://")
        || raw.starts_with("git@")
        || raw.starts_with("ssh://")
}

fn resolve_repo(repo_path_or_url: &str) -> Result<ResolvedRepo> {
    if is_clone_url(repo_path_or_url) {
        let tempdir = tempfile::tempdir().context("creating temp clone directory")?;
        git2::Repository::clone(repo_path_or_url, tempdir.path())
            .with_context(|| format!("cloning {repo_path_or_url}"))?;
        Ok(ResolvedRepo {
            path: tempdir.path().to_path_buf(),
            _tempdir: Some(tempdir),
        })
    } else {
        Ok(ResolvedRepo {
            path: PathBuf::from(repo_path_or_url),
            _tempdir: None,
        })
    }
}

fn cli_overrides(args: &IterateArgs) -> CliOverrides {
    CliOverrides {
        max_iterations: None,
        command_timeout_secs: args.timeout_secs,
        transport_kind: args.mode.map(|m| match m {
            TransportModeArg::Api => "http".to_string(),
            TransportModeArg::Browser => "browser".to_string(),
        }),
        http_endpoint: None,
        model: args.model.clone(),
        browser_url: None,
        browser_page_url: None,
        browser_user_data_dir: None,
        browser_headless: None,
        log_level: None,
        log_format: None,
        api_call_timeout_secs: args.api_timeout_secs,
        max_retries: None,
    }
}

fn build_transport(settings: &Settings) -> Result<Box<dyn AgentPort>> {
    match &settings.transport {
        TransportConfig::Http { endpoint, api_key, model } => {
            let http = HttpTransport::new(
                endpoint.clone(),
                api_key.clone(),
                model.clone(),
                settings.api_call_timeout,
            );
            Ok(Box::new(RetryingAgent::new(http, settings.retry)))
        }
        TransportConfig::Browser { webdriver_url, page_url, user_data_dir, headless } => {
            let browser = BrowserTransport::new(
                webdriver_url.clone(),
                page_url.clone(),
                user_data_dir.clone(),
                *headless,
            );
            Ok(Box::new(RetryingAgent::new(browser, settings.retry)))
        }
    }
}

async fn run_iterate(args: IterateArgs, force_api: bool, global: &GlobalOpts) -> Result<i32> {
    let resolved = resolve_repo(&args.repo_path_or_url)?;
    let repo_root = resolved.path.clone();

    let instructions = std::fs::read_to_string(&args.instructions_file)
        .with_context(|| format!("reading {}", args.instructions_file))?;

    let mut overrides = cli_overrides(&args);
    if force_api {
        overrides.transport_kind = Some("http".to_string());
    }
    let config_dir = global.config_file.as_deref().map(Path::new);
    let settings = config::resolve_with_config_dir(&repo_root, config_dir, &overrides)?;

    // Held for the rest of the process: dropping it would stop flushing the
    // rotating file sink.
    let _logging_guard = init_logging(
        global.verbose,
        global.json_logs || settings.log_format == "json",
        settings.log_dir.as_deref(),
        settings.log_backlog_count,
        &settings.log_level,
    );

    let fs_port = OsFs;
    let vcs = GitVcs::open(&repo_root).context("opening repo")?;
    let transport = build_transport(&settings)?;
    let runner = command::TokioCommandRunner {
        tail_cap_bytes: settings.command_tail_cap_bytes,
    };
    let events = TracingEventSink;
    let cancel = CancelToken::new();

    let orchestrator = Orchestrator::new(&fs_port, &vcs, transport.as_ref(), &runner, &events, cancel);

    let verify_command = args
        .cmd
        .as_ref()
        .map(|raw| VerifyCommand { line: raw.clone() });

    let budget = RunBudget {
        max_iterations: settings.max_iterations,
        max_fix_attempts_per_step: settings.max_fix_attempts_per_step,
    };

    let push_remote = if args.no_push {
        None
    } else {
        Some(args.remote.clone().unwrap_or_else(|| "origin".to_string()))
    };

    let run_cfg = RunConfig {
        run_id: uuid::Uuid::new_v4().to_string(),
        repo_root: repo_root.clone(),
        instructions,
        branch_prefix: args.branch_prefix.unwrap_or_else(|| "codeloop".to_string()),
        verify_command,
        command_timeout: settings.command_timeout,
        conversation_window_pairs: settings.conversation_window_pairs,
        budget,
        manifest_max_lines: Some(2000),
        blueprint_goal: "Describe this project's purpose, build process, architecture, and \
            contribution guidelines."
            .to_string(),
        push_remote,
        forced_iterations: args.iterations,
    };

    match orchestrator.run(&run_cfg).await {
        Ok(outcome) => {
            tracing::info!(
                iterations = outcome.iterations_completed,
                state = ?outcome.final_state,
                pushed = outcome.pushed,
                "run complete"
            );
            Ok(0)
        }
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            Ok(e.exit_code())
        }
    }
}

fn run_scan(repo_path: &str) -> Result<i32> {
    let entries = walker::manifest(Path::new(repo_path), None);
    println!("{}", walker::render_manifest(&entries));
    Ok(0)
}

fn run_validate(envelope_file: Option<&str>) -> Result<i32> {
    let raw = match envelope_file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };
    match codeloop_kernel::patch::validate(&raw) {
        Ok(payload) => {
            println!("ok: {} {}", payload.op_name(), payload.primary_path());
            Ok(0)
        }
        Err(e) => {
            eprintln!("rejected: {e}");
            Ok(2)
        }
    }
}

fn run_schema() -> Result<i32> {
    println!(
        "patch envelope: {{\"op\":\"create|update|delete|rename|chmod\",\"file\":\"<path>\",\
         \"body\"|\"body_b64\":...,\"target\":\"<path>\",\"mode\":\"644|755|0644|0755\",\
         \"status\":\"in_progress|completed\"}}"
    );
    println!(
        "plan envelope: {{\"overview\":\"<text>\",\"suggested_run_command\":\"<text>\"|null,\
         \"classifications\":[{{\"path\":\"<path>\",\"class\":\"code|doc|deferred\"}}],\
         \"estimated_iterations\":1-3}}"
    );
    Ok(0)
}

fn run_version() -> Result<i32> {
    println!("codeloop {}", env!("CARGO_PKG_VERSION"));
    Ok(0)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Iterate(args) => run_iterate(args, false, &cli.global).await?,
        Commands::Api(args) => run_iterate(args, true, &cli.global).await?,
        Commands::Scan { repo_path } => {
            let _guard = init_logging(
                cli.global.verbose,
                cli.global.json_logs,
                None,
                config::DEFAULT_LOG_BACKLOG_COUNT,
                "info",
            );
            run_scan(&repo_path)?
        }
        Commands::Validate { envelope_file } => {
            let _guard = init_logging(
                cli.global.verbose,
                cli.global.json_logs,
                None,
                config::DEFAULT_LOG_BACKLOG_COUNT,
                "info",
            );
            run_validate(envelope_file.as_deref())?
        }
        Commands::Schema => run_schema()?,
        Commands::Version => run_version()?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
