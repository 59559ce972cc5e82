//! Run report

use super::reconcile::{DeletionCandidate, DeletionOutcome, DeletionResult};
use super::types::{BuildStatus, ModuleResult};

/// Status counts for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub blocked: usize,
    pub deleted: usize,
    pub deletion_failures: usize,
}

/// Everything a build run produced
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One entry per module, in plan order
    pub results: Vec<ModuleResult>,
    /// Cached modules that were not discovered in this run
    pub deletion_candidates: Vec<DeletionCandidate>,
    /// Outcome of each deletion that was attempted
    pub deletions: Vec<DeletionResult>,
    /// The run was interrupted before every module was scheduled
    pub cancelled: bool,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for result in &self.results {
            match result.outcome.status() {
                BuildStatus::Created => summary.created += 1,
                BuildStatus::Updated => summary.updated += 1,
                BuildStatus::Unchanged => summary.unchanged += 1,
                BuildStatus::Failed => summary.failed += 1,
                BuildStatus::Blocked => summary.blocked += 1,
            }
        }
        for deletion in &self.deletions {
            match deletion.outcome {
                DeletionOutcome::Deleted | DeletionOutcome::AlreadyGone => summary.deleted += 1,
                DeletionOutcome::Failed { .. } => summary.deletion_failures += 1,
            }
        }
        summary
    }

    /// True when every module synced and every attempted deletion succeeded
    pub fn is_success(&self) -> bool {
        let summary = self.summary();
        summary.failed == 0 && summary.blocked == 0 && summary.deletion_failures == 0
    }

    /// Whether every module built without failure or block
    pub fn all_modules_synced(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }

    /// Deletion candidates that were left in place
    pub fn pending_deletions(&self) -> Vec<&DeletionCandidate> {
        self.deletion_candidates
            .iter()
            .filter(|c| !self.deletions.iter().any(|d| &d.candidate == *c))
            .collect()
    }
}
