//! Patch Applier (C2): turns a validated [`PatchPayload`] into filesystem
//! effects, checked against the preconditions each op implies — Create
//! requires the path to be new, Update/Delete/Rename/Chmod require it to
//! already exist — then stages exactly the paths touched.

use std::path::Path;

use codeloop_kernel::error::RunError;
use codeloop_kernel::patch::{FileMode, PatchContent, PatchPayload};
use codeloop_kernel::ports::{FsPort, VcsPort};

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub touched: Vec<String>,
    pub commit: Option<String>,
}

fn mode_bits(mode: FileMode) -> u32 {
    match mode {
        FileMode::Mode644 => 0o644,
        FileMode::Mode755 => 0o755,
    }
}

fn precondition(
    fs: &dyn FsPort,
    repo_root: &Path,
    path: &str,
    must_exist: bool,
) -> Result<(), RunError> {
    let exists = fs.exists(&repo_root.join(path));
    if must_exist && !exists {
        return Err(RunError::PreconditionFailure {
            path: path.to_string(),
            reason: "expected file to exist".to_string(),
        });
    }
    if !must_exist && exists {
        return Err(RunError::PreconditionFailure {
            path: path.to_string(),
            reason: "expected file not to exist".to_string(),
        });
    }
    Ok(())
}

/// Applies one patch to the working tree and stages the paths it touched.
/// The caller decides when to commit — a single commit may cover several
/// applied patches within one plan step.
pub fn apply(
    fs: &dyn FsPort,
    vcs: &dyn VcsPort,
    repo_root: &Path,
    patch: &PatchPayload,
) -> Result<ApplyOutcome, RunError> {
    match patch {
        PatchPayload::Create { file, content, .. } => {
            precondition(fs, repo_root, file, false)?;
            write_content(fs, repo_root, file, content)?;
            vcs.stage(&[file.as_str()])?;
            Ok(ApplyOutcome {
                touched: vec![file.clone()],
                commit: None,
            })
        }
        PatchPayload::Update { file, content, .. } => {
            precondition(fs, repo_root, file, true)?;
            if vcs.is_path_dirty(file)? {
                return Err(RunError::PreconditionFailure {
                    path: file.clone(),
                    reason: "file has local modifications relative to HEAD".to_string(),
                });
            }
            let bytes = content_bytes(content);
            let existing = fs.read_file(&repo_root.join(file))?;
            if existing == bytes {
                // Identical content: no-op, no stage, no commit.
                return Ok(ApplyOutcome {
                    touched: vec![],
                    commit: None,
                });
            }
            fs.write_file(&repo_root.join(file), &bytes)?;
            vcs.stage(&[file.as_str()])?;
            Ok(ApplyOutcome {
                touched: vec![file.clone()],
                commit: None,
            })
        }
        PatchPayload::Delete { file, .. } => {
            precondition(fs, repo_root, file, true)?;
            fs.remove_file(&repo_root.join(file))?;
            vcs.stage(&[file.as_str()])?;
            Ok(ApplyOutcome {
                touched: vec![file.clone()],
                commit: None,
            })
        }
        PatchPayload::Rename { file, target, .. } => {
            precondition(fs, repo_root, file, true)?;
            precondition(fs, repo_root, target, false)?;
            fs.rename(&repo_root.join(file), &repo_root.join(target))?;
            vcs.stage(&[file.as_str(), target.as_str()])?;
            Ok(ApplyOutcome {
                touched: vec![file.clone(), target.clone()],
                commit: None,
            })
        }
        PatchPayload::Chmod { file, mode, .. } => {
            precondition(fs, repo_root, file, true)?;
            fs.set_mode(&repo_root.join(file), mode_bits(*mode))?;
            vcs.stage(&[file.as_str()])?;
            Ok(ApplyOutcome {
                touched: vec![file.clone()],
                commit: None,
            })
        }
    }
}

/// Normalizes CRLF to LF and ensures a trailing newline, matching how the
/// repo's own editors would leave a text file. Binary bodies pass through
/// untouched.
fn content_bytes(content: &PatchContent) -> Vec<u8> {
    match content {
        PatchContent::Text(text) => {
            let mut normalized = text.replace("\r\n", "\n");
            if !normalized.is_empty() && !normalized.ends_with('\n') {
                normalized.push('\n');
            }
            normalized.into_bytes()
        }
        PatchContent::Binary(bytes) => bytes.clone(),
    }
}

fn write_content(
    fs: &dyn FsPort,
    repo_root: &Path,
    file: &str,
    content: &PatchContent,
) -> Result<(), RunError> {
    fs.write_file(&repo_root.join(file), &content_bytes(content))
}
