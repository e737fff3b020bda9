//! Shared fixtures for the integration suite: a throwaway git repo plus the
//! fake port implementations needed to drive the orchestrator without a
//! real model transport or shell.
//!
//! Every test here calls into `codeloop-core`/`codeloop-kernel` library
//! entry points directly rather than spawning the built `codeloop` binary.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use codeloop_core::fs::OsFs;
use codeloop_core::vcs::GitVcs;
use codeloop_kernel::error::RunError;
use codeloop_kernel::ports::{
    AgentPort, AgentRequest, AgentResponse, BoxFuture, CommandOutcome, CommandPort, EventSink,
    RunEvent, VcsPort,
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// A temp-dir-backed git repository with a first commit already made, so
/// `HEAD` is never unborn — most of the orchestrator's paths assume at
/// least one ancestor commit exists.
pub struct TestRepo {
    _dir: tempfile::TempDir,
    root: PathBuf,
    repo: git2::Repository,
}

impl TestRepo {
    pub fn init() -> TestResult<Self> {
        let dir = tempfile::tempdir()?;
        let repo = git2::Repository::init(dir.path())?;
        {
            let mut config = repo.config()?;
            config.set_str("user.name", "codeloop-tests")?;
            config.set_str("user.email", "codeloop-tests@example.com")?;
        }
        let root = dir.path().to_path_buf();
        let repo = Self {
            _dir: dir,
            root,
            repo,
        };
        repo.write("README.md", "# seed\n")?;
        repo.commit_all("seed commit")?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, relative: &str, contents: &str) -> TestResult {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    pub fn read(&self, relative: &str) -> TestResult<String> {
        Ok(std::fs::read_to_string(self.root.join(relative))?)
    }

    /// Stages everything currently on disk and commits it — used only to
    /// seed fixture state, never to exercise the exact-pathspec staging the
    /// applier itself is responsible for.
    pub fn commit_all(&self, message: &str) -> TestResult {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.repo.signature()?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(())
    }

    pub fn fs(&self) -> OsFs {
        OsFs
    }

    pub fn vcs(&self) -> TestResult<GitVcs> {
        Ok(GitVcs::open(&self.root)?)
    }

    pub fn head_sha(&self) -> TestResult<String> {
        Ok(self.repo.head()?.peel_to_commit()?.id().to_string())
    }
}

/// Replies a fixed sequence of raw transport payloads in order; panics if
/// asked for more than were scripted, so a test that under-counts its turns
/// fails loudly instead of hanging.
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedAgent {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ScriptedAgent {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }
}

impl AgentPort for ScriptedAgent {
    fn submit<'a>(&'a self, _request: AgentRequest) -> BoxFuture<'a, Result<AgentResponse, RunError>> {
        Box::pin(async move {
            let mut replies = self.replies.lock().unwrap();
            let raw_text = replies
                .pop_front()
                .expect("ScriptedAgent asked for more replies than were scripted");
            Ok(AgentResponse { raw_text })
        })
    }
}

/// A verification command stub that always reports success without
/// spawning a process.
pub struct AlwaysOkCommand;

impl CommandPort for AlwaysOkCommand {
    fn run<'a>(
        &'a self,
        _command_line: &'a str,
        _cwd: &'a Path,
        _timeout: std::time::Duration,
    ) -> BoxFuture<'a, Result<CommandOutcome, RunError>> {
        Box::pin(async move {
            Ok(CommandOutcome {
                exit_code: Some(0),
                tail: String::new(),
                succeeded: true,
            })
        })
    }
}

pub struct NullEvents;

impl EventSink for NullEvents {
    fn emit(&self, _event: RunEvent) {}
}

/// Records every emitted event for assertions, instead of discarding them.
pub struct RecordingEvents {
    pub events: Mutex<Vec<RunEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        RecordingEvents {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Seeds all four blueprint docs so a run can skip straight past
/// `BlueprintPreflight` into planning.
pub fn seed_blueprints(repo: &TestRepo) -> TestResult {
    use codeloop_core::blueprint::BLUEPRINTS_SUBDIR;
    use codeloop_core::state::STATE_SUBDIR;
    use codeloop_kernel::plan::BlueprintKind;

    let blueprints_dir = repo.root().join(STATE_SUBDIR).join(BLUEPRINTS_SUBDIR);
    std::fs::create_dir_all(&blueprints_dir)?;
    for kind in BlueprintKind::ALL {
        let path = blueprints_dir.join(kind.file_name());
        std::fs::write(path, format!("# {}\n\nseed content\n", kind.title()))?;
    }
    Ok(())
}
