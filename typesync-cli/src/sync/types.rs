//! Types shared across the sync engine

use std::fmt;

use crate::definition::ModuleId;

/// Terminal status of one module in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    Created,
    Updated,
    Unchanged,
    Failed,
    Blocked,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a module was never executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// A dependency failed or was itself blocked
    Dependency(ModuleId),
    /// The run was interrupted before the module was scheduled
    Cancelled,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependency(id) => write!(f, "dependency {} did not sync", id),
            Self::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Result of building one module
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Created { remote_id: String },
    Updated { remote_id: String },
    Unchanged { remote_id: String },
    Failed { error: String },
    Blocked { reason: BlockReason },
}

impl BuildOutcome {
    pub fn status(&self) -> BuildStatus {
        match self {
            Self::Created { .. } => BuildStatus::Created,
            Self::Updated { .. } => BuildStatus::Updated,
            Self::Unchanged { .. } => BuildStatus::Unchanged,
            Self::Failed { .. } => BuildStatus::Failed,
            Self::Blocked { .. } => BuildStatus::Blocked,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::Created { remote_id }
            | Self::Updated { remote_id }
            | Self::Unchanged { remote_id } => Some(remote_id),
            Self::Failed { .. } | Self::Blocked { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.remote_id().is_some()
    }
}

/// Per-module entry of a run report
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleResult {
    pub module: ModuleId,
    pub outcome: BuildOutcome,
}

/// What synchronising a module changed remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Successful synchronisation of one module, memoised per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub remote_id: String,
    pub change: Change,
}

impl SyncOutcome {
    pub fn into_outcome(self) -> BuildOutcome {
        let remote_id = self.remote_id;
        match self.change {
            Change::Created => BuildOutcome::Created { remote_id },
            Change::Updated => BuildOutcome::Updated { remote_id },
            Change::Unchanged => BuildOutcome::Unchanged { remote_id },
        }
    }
}
