//! Filesystem effects (`FsPort`): plain reads/writes plus the atomic-write
//! primitive everything durable in this crate is built on — write to a
//! sibling temp file, `sync_all`, then `rename` over the target, so a crash
//! mid-write never leaves a half-written file in place.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use codeloop_kernel::error::RunError;
use codeloop_kernel::ports::FsPort;

pub struct OsFs;

fn io_err(context: &str, e: std::io::Error) -> RunError {
    RunError::ConfigError(format!("{context}: {e}"))
}

impl FsPort for OsFs {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, RunError> {
        fs::read(path).map_err(|e| io_err(&format!("reading {}", path.display()), e))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), RunError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_err(&format!("creating {}", parent.display()), e))?;
        }
        fs::write(path, contents).map_err(|e| io_err(&format!("writing {}", path.display()), e))
    }

    fn remove_file(&self, path: &Path) -> Result<(), RunError> {
        fs::remove_file(path).map_err(|e| io_err(&format!("removing {}", path.display()), e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RunError> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_err(&format!("creating {}", parent.display()), e))?;
        }
        fs::rename(from, to).map_err(|e| {
            io_err(
                &format!("renaming {} to {}", from.display(), to.display()),
                e,
            )
        })
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> Result<(), RunError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| io_err(&format!("chmod {}", path.display()), e))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, _path: &Path, _mode: u32) -> Result<(), RunError> {
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), RunError> {
        let parent = path
            .parent()
            .ok_or_else(|| RunError::ConfigError(format!("{} has no parent dir", path.display())))?;
        fs::create_dir_all(parent).map_err(|e| io_err(&format!("creating {}", parent.display()), e))?;

        let tmp_path = parent.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("codeloop")
        ));
        let mut tmp = File::create(&tmp_path)
            .map_err(|e| io_err(&format!("creating {}", tmp_path.display()), e))?;
        tmp.write_all(contents)
            .map_err(|e| io_err(&format!("writing {}", tmp_path.display()), e))?;
        tmp.sync_all()
            .map_err(|e| io_err(&format!("syncing {}", tmp_path.display()), e))?;
        fs::rename(&tmp_path, path).map_err(|e| {
            io_err(
                &format!("renaming {} to {}", tmp_path.display(), path.display()),
                e,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");
        let fs_port = OsFs;
        fs_port.write_atomic(&target, b"{}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{}");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");
        let fs_port = OsFs;
        fs_port.write_atomic(&target, b"one").unwrap();
        fs_port.write_atomic(&target, b"two").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"two");
    }
}
