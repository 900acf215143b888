//! branchwatch core library.
//!
//! Keeps a persisted model of a repository's branches in step with the
//! remote, searches for pairwise merge conflicts between them, and cascades
//! automatic merges of one branch into many targets. The `git` executable
//! is driven through the [`git::RepositoryGateway`] seam; state lives in
//! SQLite.

pub mod auto_merge;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod db;
pub mod engine;
pub mod errors;
pub mod git;
pub mod models;
pub mod patterns;
pub mod suppression;

// Re-exports for convenience.
pub use auto_merge::{AutoMerger, MergeReport};
pub use catalog::BranchCatalog;
pub use config::{AppConfig, RepositorySettings};
pub use conflict::{ConflictDetector, DetectionReport};
pub use db::Database;
pub use engine::{BranchEngine, RunMode, RunOutcome, RunReport};
pub use git::GitClient;
pub use suppression::SuppressionLedger;
