//! Sync engine
//!
//! Shadow-executes definition modules to infer their dependencies, orders
//! them, and reconciles each module's desired state against the remote
//! service, skipping modules whose fingerprint has not changed.

pub mod analysis;
pub mod cache;
pub mod context;
pub mod dependency_graph;
pub mod fingerprint;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod schema_diff;
pub mod types;

pub use analysis::{AnalysisReport, DependencyAnalyzer};
pub use cache::{CacheMode, CacheStore, ReconciliationCache};
pub use dependency_graph::{BuildPlan, DependencyGraph};
pub use orchestrator::{BuildOptions, Orchestrator};
pub use reconcile::{DeletionCandidate, DeletionOutcome};
pub use report::RunReport;
pub use types::{BuildOutcome, BuildStatus};
