//! State Store (C5): the three kinds of artifact a run persists, all
//! written atomically (temp file + `sync_all` + `rename`, via
//! [`FsPort::write_atomic`]) so a crash never leaves a half-written file —
//! a resume record at the repo root, and two JSON+markdown plan pairs
//! (initial, review) under the well-known `.codeloop` subdirectory.
//!
//! Reads tolerate an absent or unparsable file by treating it as "no
//! state" rather than erroring the run.

use std::path::{Path, PathBuf};

use codeloop_kernel::error::RunError;
use codeloop_kernel::plan::IterationPlan;
use codeloop_kernel::ports::{FsPort, SchedulerStore};
use codeloop_kernel::resume::ResumeRecord;

pub const STATE_SUBDIR: &str = ".codeloop";

pub struct FileStateStore<'a> {
    fs: &'a dyn FsPort,
    repo_root: PathBuf,
}

impl<'a> FileStateStore<'a> {
    pub fn new(fs: &'a dyn FsPort, repo_root: &Path) -> Self {
        FileStateStore {
            fs,
            repo_root: repo_root.to_path_buf(),
        }
    }

    fn resume_path(&self) -> PathBuf {
        self.repo_root.join(STATE_SUBDIR).join("resume.json")
    }

    fn plan_json_path(&self, name: &str) -> PathBuf {
        self.repo_root.join(STATE_SUBDIR).join(format!("{name}.json"))
    }

    fn plan_markdown_path(&self, name: &str) -> PathBuf {
        self.repo_root.join(STATE_SUBDIR).join(format!("{name}.md"))
    }

    /// Writes a plan's JSON (the source of truth) and regenerates its
    /// markdown twin. The markdown is never parsed back in — see
    /// [`IterationPlan::to_markdown`].
    pub fn save_plan(&self, name: &str, plan: &IterationPlan) -> Result<(), RunError> {
        let json_bytes = serde_json::to_vec_pretty(plan)
            .map_err(|e| RunError::ConfigError(format!("serializing {name} plan: {e}")))?;
        self.fs.write_atomic(&self.plan_json_path(name), &json_bytes)?;
        self.fs
            .write_atomic(&self.plan_markdown_path(name), plan.to_markdown().as_bytes())
    }

    pub fn load_plan(&self, name: &str) -> Result<Option<IterationPlan>, RunError> {
        let path = self.plan_json_path(name);
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let bytes = self.fs.read_file(&path)?;
        match serde_json::from_slice(&bytes) {
            Ok(plan) => Ok(Some(plan)),
            Err(_) => Ok(None),
        }
    }
}

pub const INITIAL_PLAN_NAME: &str = "initial-plan";
pub const REVIEW_PLAN_NAME: &str = "review-plan";

impl SchedulerStore for FileStateStore<'_> {
    fn load(&self, _run_id: &str) -> Result<Option<ResumeRecord>, RunError> {
        let path = self.resume_path();
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let bytes = self.fs.read_file(&path)?;
        match serde_json::from_slice::<ResumeRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            // A partially corrupted file is "no state", not an error.
            Err(_) => Ok(None),
        }
    }

    fn save(&self, record: &ResumeRecord) -> Result<(), RunError> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| RunError::ConfigError(format!("serializing resume record: {e}")))?;
        self.fs.write_atomic(&self.resume_path(), &bytes)
    }
}
