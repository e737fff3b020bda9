//! `git2`-backed implementation of [`VcsPort`]: exact-pathspec staging,
//! tree/commit construction, and the SHA lookups the patch applier uses for
//! precondition checks.

use std::path::Path;

use codeloop_kernel::error::RunError;
use codeloop_kernel::ports::VcsPort;
use git2::{Cred, IndexAddOption, PushOptions, RemoteCallbacks, Repository, RepositoryState, Signature};

pub struct GitVcs {
    repo: parking_lot::Mutex<Repository>,
}

impl GitVcs {
    pub fn open(repo_root: &Path) -> Result<Self, RunError> {
        let repo = Repository::open(repo_root)
            .map_err(|e| RunError::GitIndexCorrupt(format!("opening repo: {e}")))?;
        Ok(GitVcs {
            repo: parking_lot::Mutex::new(repo),
        })
    }
}

fn stage_exact(repo: &Repository, paths: &[&str]) -> Result<(), git2::Error> {
    let mut index = repo.index()?;
    for raw in paths {
        let p = Path::new(raw);
        if p.is_dir() {
            // Only reached for a rename target's parent check; patches never
            // name a directory, but staying exact-pathspec here too.
            index.add_all([p], IndexAddOption::DEFAULT, None)?;
        } else if p.exists() {
            index.add_path(p)?;
        } else {
            // Deleted/renamed-away file: reflect the removal in the index.
            let _ = index.remove_path(p);
        }
    }
    index.write()?;
    Ok(())
}

fn commit_staged(repo: &Repository, message: &str) -> Result<Option<git2::Oid>, git2::Error> {
    let mut index = repo.index()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let signature = repo
        .signature()
        .or_else(|_| Signature::now("codeloop", "codeloop@local"))?;

    let parent_commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());

    if let Some(ref parent) = parent_commit {
        if parent.tree_id() == tree_id {
            return Ok(None);
        }
    }

    let parents: Vec<&git2::Commit> = match parent_commit.as_ref() {
        Some(p) => vec![p],
        None => vec![],
    };

    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )?;
    Ok(Some(oid))
}

/// Tries, in order, ssh-agent, the git credential helper configured for the
/// repo, and finally a plain default — the common strategies covering both
/// SSH and HTTPS remotes without requiring the caller to hand us a secret
/// directly.
fn credentials_callback(
    url: &str,
    username_from_url: Option<&str>,
    allowed: git2::CredentialType,
) -> Result<Cred, git2::Error> {
    let username = username_from_url.unwrap_or("git");
    if allowed.contains(git2::CredentialType::SSH_KEY) {
        if let Ok(cred) = Cred::ssh_key_from_agent(username) {
            return Ok(cred);
        }
    }
    if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) {
        if let Ok(cred) = Cred::credential_helper(&git2::Config::open_default()?, url, Some(username)) {
            return Ok(cred);
        }
    }
    Cred::default()
}

fn push_current_branch(repo: &Repository, remote_name: &str) -> Result<(), RunError> {
    if repo.state() != RepositoryState::Clean {
        return Err(RunError::PushFailed(format!(
            "repository is mid-operation ({:?}); resolve it before pushing",
            repo.state()
        )));
    }

    let head = repo
        .head()
        .map_err(|e| RunError::PushFailed(format!("reading HEAD: {e}")))?;
    if !head.is_branch() {
        return Err(RunError::PushFailed(
            "HEAD is detached; nothing to push".to_string(),
        ));
    }
    let branch_ref = head
        .name()
        .ok_or_else(|| RunError::PushFailed("HEAD has no ref name".to_string()))?
        .to_string();

    let mut remote = repo
        .find_remote(remote_name)
        .map_err(|e| RunError::PushFailed(format!("locating remote {remote_name}: {e}")))?;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(credentials_callback);

    let rejections: std::rc::Rc<std::cell::RefCell<Vec<(String, String)>>> =
        std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let rejections_cb = std::rc::Rc::clone(&rejections);
    callbacks.push_update_reference(move |refname, status| {
        if let Some(status) = status {
            rejections_cb
                .borrow_mut()
                .push((refname.to_string(), status.to_string()));
        }
        Ok(())
    });

    let mut push_opts = PushOptions::new();
    push_opts.remote_callbacks(callbacks);

    let refspec = format!("{branch_ref}:{branch_ref}");
    remote
        .push(&[refspec.as_str()], Some(&mut push_opts))
        .map_err(|e| RunError::PushFailed(format!("pushing to {remote_name}: {e}")))?;

    let rejected = rejections.borrow();
    if !rejected.is_empty() {
        let msg = rejected
            .iter()
            .map(|(name, status)| format!("{name} ({status})"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(RunError::PushFailed(format!(
            "remote rejected updates for: {msg}"
        )));
    }

    Ok(())
}

impl VcsPort for GitVcs {
    fn stage(&self, paths: &[&str]) -> Result<(), RunError> {
        let repo = self.repo.lock();
        stage_exact(&repo, paths)
            .map_err(|e| RunError::GitIndexCorrupt(format!("staging {paths:?}: {e}")))
    }

    fn commit(&self, message: &str) -> Result<Option<String>, RunError> {
        let repo = self.repo.lock();
        commit_staged(&repo, message)
            .map(|maybe_oid| maybe_oid.map(|oid| oid.to_string()))
            .map_err(|e| RunError::GitIndexCorrupt(format!("committing: {e}")))
    }

    fn head_sha(&self) -> Result<Option<String>, RunError> {
        let repo = self.repo.lock();
        match repo.head() {
            Ok(head) => match head.peel_to_commit() {
                Ok(commit) => Ok(Some(commit.id().to_string())),
                Err(e) => Err(RunError::GitIndexCorrupt(format!("peeling HEAD: {e}"))),
            },
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(e) => Err(RunError::GitIndexCorrupt(format!("reading HEAD: {e}"))),
        }
    }

    fn file_sha(&self, path: &str) -> Result<Option<String>, RunError> {
        let repo = self.repo.lock();
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(RunError::GitIndexCorrupt(format!("reading HEAD: {e}"))),
        };
        let tree = head
            .peel_to_tree()
            .map_err(|e| RunError::GitIndexCorrupt(format!("peeling tree: {e}")))?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => Ok(Some(entry.id().to_string())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(RunError::GitIndexCorrupt(format!(
                "looking up {path}: {e}"
            ))),
        }
    }

    fn checkout_branch(&self, name: &str) -> Result<(), RunError> {
        let repo = self.repo.lock();
        let refname = format!("refs/heads/{name}");
        if repo.find_reference(&refname).is_err() {
            match repo.head().ok().and_then(|h| h.peel_to_commit().ok()) {
                Some(commit) => {
                    repo.branch(name, &commit, false)
                        .map_err(|e| RunError::GitIndexCorrupt(format!("creating branch {name}: {e}")))?;
                }
                None => {
                    // Unborn branch: nothing to branch from yet, first commit
                    // on HEAD will retroactively become this branch's root
                    // once `set_head` below points at it.
                }
            }
        }
        repo.set_head(&refname)
            .map_err(|e| RunError::GitIndexCorrupt(format!("setting HEAD to {name}: {e}")))?;
        if repo.head().ok().and_then(|h| h.peel_to_commit().ok()).is_some() {
            repo.checkout_head(Some(git2::build::CheckoutBuilder::new().safe()))
                .map_err(|e| RunError::GitIndexCorrupt(format!("checking out {name}: {e}")))?;
        }
        Ok(())
    }

    fn current_branch(&self) -> Result<Option<String>, RunError> {
        let repo = self.repo.lock();
        match repo.head() {
            Ok(head) => Ok(head.shorthand().map(str::to_string)),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                // HEAD still points at a symbolic ref even before the first
                // commit exists.
                let head_ref = repo
                    .find_reference("HEAD")
                    .map_err(|e| RunError::GitIndexCorrupt(format!("reading HEAD ref: {e}")))?;
                Ok(head_ref
                    .symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .map(str::to_string))
            }
            Err(e) => Err(RunError::GitIndexCorrupt(format!("reading HEAD: {e}"))),
        }
    }

    fn is_path_dirty(&self, path: &str) -> Result<bool, RunError> {
        let repo = self.repo.lock();
        let mut opts = git2::StatusOptions::new();
        opts.pathspec(path).include_untracked(true);
        let statuses = repo
            .statuses(Some(&mut opts))
            .map_err(|e| RunError::GitIndexCorrupt(format!("reading status for {path}: {e}")))?;
        Ok(!statuses.is_empty())
    }

    fn push(&self, remote_name: &str) -> Result<(), RunError> {
        let repo = self.repo.lock();
        push_current_branch(&repo, remote_name)
    }
}
