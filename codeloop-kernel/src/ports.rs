//! The seams between the orchestrator and the outside world. Every effect
//! the run loop performs — touching the filesystem, talking to git, asking
//! the clock, calling the model, running a verification command, persisting
//! state — goes through one of these traits, so the orchestrator can be
//! driven by fakes in tests without a real repo or network on the other end.

use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use std::future::Future;

use crate::error::RunError;
use crate::resume::ResumeRecord;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Filesystem effects: applying patches and persisting state atomically.
pub trait FsPort: Send + Sync {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, RunError>;
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), RunError>;
    fn remove_file(&self, path: &Path) -> Result<(), RunError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), RunError>;
    fn set_mode(&self, path: &Path, mode: u32) -> Result<(), RunError>;
    fn exists(&self, path: &Path) -> bool;

    /// Atomic write: temp file in the same directory, `sync_all`, then
    /// `rename` over the target — so a crash never leaves a half-written file.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), RunError>;
}

/// Version-control effects: staging exact pathspecs, committing, and
/// checking preconditions (expected-SHA / must-not-exist) before a patch
/// lands.
pub trait VcsPort: Send + Sync {
    fn stage(&self, paths: &[&str]) -> Result<(), RunError>;
    fn commit(&self, message: &str) -> Result<Option<String>, RunError>;
    fn head_sha(&self) -> Result<Option<String>, RunError>;
    fn file_sha(&self, path: &str) -> Result<Option<String>, RunError>;
    /// Checks out `name`, creating it from HEAD first if it doesn't exist.
    fn checkout_branch(&self, name: &str) -> Result<(), RunError>;
    fn current_branch(&self) -> Result<Option<String>, RunError>;
    /// Working-tree cleanliness for one specific path — an unrelated dirty
    /// file elsewhere must not block an otherwise-valid apply.
    fn is_path_dirty(&self, path: &str) -> Result<bool, RunError>;
    /// Pushes the currently checked-out branch to `remote_name`, creating a
    /// same-named ref on the remote if it doesn't already exist there.
    fn push(&self, remote_name: &str) -> Result<(), RunError>;
}

pub trait ClockPort: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub turns: Vec<crate::conversation::Turn>,
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub raw_text: String,
}

/// A single model/transport turn. Implementations (HTTP chat-completions,
/// browser automation) race against their own internal timeout and convert
/// every failure into a `RunError` the orchestrator already knows how to
/// classify.
pub trait AgentPort: Send + Sync {
    fn submit<'a>(&'a self, request: AgentRequest) -> BoxFuture<'a, Result<AgentResponse, RunError>>;
}

/// Runs a verification command with a timeout and returns its outcome; never
/// panics on a non-zero exit, since that's an ordinary `RunError` the
/// orchestrator feeds back to the model.
///
/// `command_line` is handed to a subshell verbatim (spec's "spawns `cmd` in
/// a subshell under `cwd`") rather than split and exec'd directly, so pipes,
/// `&&`, quoting, globs, and env expansion in a user-supplied verification
/// command behave the way they would at an interactive shell.
pub trait CommandPort: Send + Sync {
    fn run<'a>(
        &'a self,
        command_line: &'a str,
        cwd: &'a Path,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutcome, RunError>>;
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: Option<i32>,
    pub tail: String,
    pub succeeded: bool,
}

/// Persists and reloads the atomic resume record between runs.
pub trait SchedulerStore: Send + Sync {
    fn load(&self, run_id: &str) -> Result<Option<ResumeRecord>, RunError>;
    fn save(&self, record: &ResumeRecord) -> Result<(), RunError>;
}

/// Where the orchestrator emits structured progress events; the CLI's
/// logging sink and test fakes both implement this.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    PlanCreated { steps: usize },
    StepStarted { step_id: String },
    PatchValidated { op: String, path: String },
    PatchApplied { op: String, path: String },
    CommandRun { command: String, succeeded: bool },
    StepVerified { step_id: String },
    StepFailed { step_id: String, reason: String },
    RunFinished { ok: bool },
}

/// Cooperative cancellation, checked by the orchestrator at every
/// suspension point (before a transport call, before running a command,
/// before a retry sleep) rather than threaded through every port's
/// signature.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }
}
