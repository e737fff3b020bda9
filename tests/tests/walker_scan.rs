//! Repo scanner: syntactic classification and manifest rendering against a
//! real directory tree, including a `.gitignore`.

mod support;

use codeloop_core::walker;
use codeloop_kernel::plan::FileClass;
use support::{TestRepo, TestResult};

#[test]
fn classify_sorts_code_docs_and_deferred_by_extension_and_location() -> TestResult {
    assert_eq!(walker::classify(std::path::Path::new("src/main.rs")), FileClass::Code);
    assert_eq!(walker::classify(std::path::Path::new("README.md")), FileClass::Doc);
    assert_eq!(
        walker::classify(std::path::Path::new("examples/demo.rs")),
        FileClass::Deferred
    );
    assert_eq!(
        walker::classify(std::path::Path::new("Dockerfile")),
        FileClass::Deferred
    );
    Ok(())
}

#[test]
fn scan_respects_gitignore_and_manifest_is_sorted_by_class_then_path() -> TestResult {
    let repo = TestRepo::init()?;
    repo.write(".gitignore", "ignored.rs\ntarget/\n")?;
    repo.write("ignored.rs", "fn main() {}\n")?;
    repo.write("src/lib.rs", "pub fn hi() {}\n")?;
    repo.write("target/debug/build", "junk")?;
    repo.write("docs/guide.md", "# guide\n")?;
    repo.write("examples/demo.rs", "fn demo() {}\n")?;

    let files = walker::scan(repo.root());
    assert!(!files.iter().any(|p| p.ends_with("ignored.rs")));
    assert!(!files.iter().any(|p| p.to_string_lossy().contains("target/")));
    assert!(files.iter().any(|p| p.ends_with("src/lib.rs")));

    let manifest = walker::manifest(repo.root(), None);
    let classes: Vec<_> = manifest.iter().map(|e| e.class).collect();
    let first_deferred = classes.iter().position(|c| *c == FileClass::Deferred);
    let last_code = classes.iter().rposition(|c| *c == FileClass::Code);
    if let (Some(fd), Some(lc)) = (first_deferred, last_code) {
        assert!(lc < fd, "code entries must sort before deferred entries");
    }

    let rendered = walker::render_manifest(&manifest);
    assert!(rendered.contains("src/lib.rs"));
    assert!(!rendered.contains("ignored.rs"));
    Ok(())
}
