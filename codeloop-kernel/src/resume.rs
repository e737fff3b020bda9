//! Resume-state data model: the small record written atomically after
//! every successful commit so a restart can pick up where a run left off.
//!
//! The mechanics of the atomic write (temp file + `sync_all` + `rename`)
//! live in the filesystem port implementation; this module only defines
//! the shape and the reconciliation rule: if the on-disk record's commit
//! id doesn't match the repo's actual HEAD, treat it as "no state" rather
//! than trusting a record that predates a crash between commit and write.

use serde::{Deserialize, Serialize};

/// Written atomically after every successful commit. Reads tolerate an
/// absent or partially corrupted file by treating it as "no state" — see
/// [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub run_id: String,
    /// Repository-relative path of the last file a patch was applied to.
    pub last_file: String,
    /// Commit id the last successful apply produced.
    pub last_commit: String,
    /// Monotonically increasing index of the step this record reflects.
    pub step_index: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ResumeRecord {
    pub fn new(run_id: impl Into<String>, last_file: impl Into<String>, last_commit: impl Into<String>, step_index: u64) -> Self {
        ResumeRecord {
            run_id: run_id.into(),
            last_file: last_file.into(),
            last_commit: last_commit.into(),
            step_index,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn advanced(&self, last_file: impl Into<String>, last_commit: impl Into<String>) -> Self {
        ResumeRecord {
            run_id: self.run_id.clone(),
            last_file: last_file.into(),
            last_commit: last_commit.into(),
            step_index: self.step_index + 1,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Reconciles a loaded record against the repo's actual HEAD. A record
/// whose `last_commit` doesn't match `current_head` was written (or
/// expected to be written) after a commit that never durably landed, or
/// describes a HEAD the repo has since moved past some other way — in
/// either case it is stale and the run starts fresh.
pub fn reconcile(record: Option<ResumeRecord>, current_head: Option<&str>) -> Option<ResumeRecord> {
    let record = record?;
    match current_head {
        Some(head) if head == record.last_commit => Some(record),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_keeps_record_matching_head() {
        let record = ResumeRecord::new("run-1", "a.txt", "deadbeef", 3);
        let kept = reconcile(Some(record.clone()), Some("deadbeef"));
        assert_eq!(kept, Some(record));
    }

    #[test]
    fn reconcile_drops_record_on_mismatch() {
        let record = ResumeRecord::new("run-1", "a.txt", "deadbeef", 3);
        assert_eq!(reconcile(Some(record), Some("other-sha")), None);
    }

    #[test]
    fn reconcile_drops_record_when_head_is_unborn() {
        let record = ResumeRecord::new("run-1", "a.txt", "deadbeef", 3);
        assert_eq!(reconcile(Some(record), None), None);
    }

    #[test]
    fn reconcile_passes_through_absent_record() {
        assert_eq!(reconcile(None, Some("deadbeef")), None);
    }

    #[test]
    fn advanced_bumps_step_index_and_timestamp_fields() {
        let record = ResumeRecord::new("run-1", "a.txt", "sha1", 0);
        let next = record.advanced("b.txt", "sha2");
        assert_eq!(next.step_index, 1);
        assert_eq!(next.last_file, "b.txt");
        assert_eq!(next.last_commit, "sha2");
        assert_eq!(next.run_id, "run-1");
    }
}
