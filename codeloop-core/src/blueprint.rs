//! Blueprint Manager (C4): ensures the four canonical documents exist
//! under `<state-dir>/blueprints/`, requesting generation for whichever
//! are missing through the normal patch protocol (one file per reply) and
//! applying/committing each via the Patch Applier (C2).

use std::path::{Path, PathBuf};

use codeloop_kernel::error::RunError;
use codeloop_kernel::plan::{BlueprintDocStatus, BlueprintKind, BlueprintSet};
use codeloop_kernel::ports::FsPort;

pub const BLUEPRINTS_SUBDIR: &str = "blueprints";

fn blueprint_path(state_dir: &Path, kind: BlueprintKind) -> PathBuf {
    state_dir.join(BLUEPRINTS_SUBDIR).join(kind.file_name())
}

/// Surveys which of the four canonical docs already exist under
/// `<state_dir>/blueprints/` and their cached size.
pub fn survey(fs: &dyn FsPort, state_dir: &Path) -> BlueprintSet {
    let docs = BlueprintKind::ALL
        .iter()
        .map(|&kind| {
            let path = blueprint_path(state_dir, kind);
            let present = fs.exists(&path);
            let size_bytes = if present {
                fs.read_file(&path).map(|b| b.len() as u64).unwrap_or(0)
            } else {
                0
            };
            BlueprintDocStatus {
                kind,
                present,
                size_bytes,
            }
        })
        .collect();
    BlueprintSet { docs }
}

/// Repo-relative path for a blueprint doc, for use as the `file` field of
/// the patch payload requested to generate it.
pub fn doc_repo_path(state_dir_relative: &Path, kind: BlueprintKind) -> String {
    blueprint_path(state_dir_relative, kind)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Renders the prompt fed to the model when requesting one missing doc.
/// `repo_relative_file` is the path (relative to the repo root, e.g.
/// `.codeloop/blueprints/whitepaper.md`) the model's patch envelope must
/// name in its `file` field.
pub fn generation_prompt(kind: BlueprintKind, goal: &str, repo_relative_file: &str) -> String {
    format!(
        "The repository is missing its {title}. Before any iteration work begins, \
         write this document grounded in the instructions below and the current \
         repository contents. Reply with exactly one patch envelope: a Create for \
         `{file}` with status completed.\n\nInstructions:\n{goal}",
        title = kind.title(),
        file = repo_relative_file,
    )
}

/// Fails only if the underlying read errors in an unexpected way; absence
/// of a doc is not an error, it's represented in the returned set.
pub fn ensure_readable(fs: &dyn FsPort, state_dir: &Path) -> Result<BlueprintSet, RunError> {
    Ok(survey(fs, state_dir))
}
