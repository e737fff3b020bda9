//! Repo Scanner (C3): a deterministic, ignore-respecting walk of the
//! working tree, used to build the file listing the model sees and to
//! confirm a target path exists before a precondition check runs.
//!
//! Classification is purely syntactic — extension and top-level location,
//! no content heuristics — and feeds two decisions downstream: which files
//! each iteration is allowed to touch (C8 restricts iterations 1-2 to
//! code/doc, deferring setup/example/docs-adjacent files to the last one),
//! and how the manifest text shown to the model is ordered.

use std::path::{Path, PathBuf};

use codeloop_kernel::plan::FileClass;
use ignore::WalkBuilder;

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];
const DEFERRED_TOP_LEVEL: &[&str] = &["examples", "demos", "fixtures", "testdata", "docs"];
const DEFERRED_NAMES: &[&str] = &[
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    ".dockerignore",
];

/// Every non-ignored file under `repo_root`, sorted for determinism — two
/// scans of an unchanged tree always produce the same listing.
pub fn scan(repo_root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkBuilder::new(repo_root)
        .hidden(false)
        .git_ignore(true)
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter_map(|entry| entry.path().strip_prefix(repo_root).ok().map(Path::to_owned))
        .collect();
    files.sort();
    files
}

/// Syntactic classification: doc by extension, deferred by top-level
/// directory or well-known setup filename, everything else code.
pub fn classify(relative_path: &Path) -> FileClass {
    let top_level = relative_path
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string());
    if let Some(top) = &top_level {
        if DEFERRED_TOP_LEVEL.contains(&top.as_str()) {
            return FileClass::Deferred;
        }
    }

    let file_name = relative_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if DEFERRED_NAMES.contains(&file_name.as_str()) {
        return FileClass::Deferred;
    }

    match relative_path.extension().and_then(|e| e.to_str()) {
        Some(ext) if DOC_EXTENSIONS.contains(&ext) => FileClass::Doc,
        _ => FileClass::Code,
    }
}

/// One entry of the size-bounded manifest: a repo-relative path plus its
/// syntactic classification.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub class: FileClass,
}

/// Produces a deterministic, size-bounded textual listing of the repo:
/// every non-ignored file with its classification, one per line, capped at
/// `max_lines` entries (deferred files sorted after code/doc so a
/// truncated manifest still shows the model what matters first).
pub fn manifest(repo_root: &Path, max_lines: Option<usize>) -> Vec<ManifestEntry> {
    let mut entries: Vec<ManifestEntry> = scan(repo_root)
        .into_iter()
        .map(|path| {
            let class = classify(&path);
            ManifestEntry { path, class }
        })
        .collect();

    entries.sort_by_key(|e| {
        let class_rank = match e.class {
            FileClass::Code => 0,
            FileClass::Doc => 1,
            FileClass::Deferred => 2,
        };
        (class_rank, e.path.clone())
    });

    if let Some(max) = max_lines {
        entries.truncate(max);
    }
    entries
}

/// Renders a [`manifest`] as the plain-text listing handed to prompts.
pub fn render_manifest(entries: &[ManifestEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let tag = match entry.class {
                FileClass::Code => "code",
                FileClass::Doc => "doc",
                FileClass::Deferred => "deferred",
            };
            format!("{} [{tag}]", entry.path.display())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn is_binary(path: &Path) -> std::io::Result<bool> {
    use std::io::Read;
    let mut buf = [0u8; 512];
    let mut file = std::fs::File::open(path)?;
    let n = file.read(&mut buf)?;
    Ok(buf[..n].contains(&0))
}
