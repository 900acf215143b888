//! Domain model types used throughout branchwatch.
//!
//! These types bridge the reconciliation components and the database layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DatabaseError;

// ---------------------------------------------------------------------------
// Repository / User
// ---------------------------------------------------------------------------

/// A configured repository. All other entities are scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
}

/// A branch author, identified by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// A remote branch as last seen by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: i64,
    pub repository_id: i64,
    pub name: String,
    pub author_id: i64,
    /// Last-modified timestamp reported by git.
    pub git_updated_at: DateTime<Utc>,
    /// When the detector or merger last processed this branch.
    pub git_tested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Stamped on every reconciliation that lists this branch.
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    /// A branch is untested until it has been processed at or after its
    /// last modification.
    pub fn is_untested(&self) -> bool {
        match self.git_tested_at {
            None => true,
            Some(tested) => tested < self.git_updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// Canonical unordered pair of branch ids: `low < high`, so that (A,B) and
/// (B,A) address the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchPair {
    low: i64,
    high: i64,
}

impl BranchPair {
    /// Canonicalize `(a, b)`. A branch cannot conflict with itself.
    pub fn new(a: i64, b: i64) -> Result<Self, DatabaseError> {
        if a == b {
            return Err(DatabaseError::Validation {
                entity: "conflict".into(),
                detail: format!("branch {} cannot conflict with itself", a),
            });
        }
        Ok(Self {
            low: a.min(b),
            high: a.max(b),
        })
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn contains(&self, branch_id: i64) -> bool {
        self.low == branch_id || self.high == branch_id
    }
}

/// A merge conflict between two branches of the same repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: i64,
    pub branch_a_id: i64,
    pub branch_b_id: i64,
    pub resolved: bool,
    pub status_last_changed: DateTime<Utc>,
    /// Sorted, de-duplicated file paths. Empty once resolved.
    pub conflicting_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conflict {
    pub fn pair(&self) -> BranchPair {
        BranchPair {
            low: self.branch_a_id,
            high: self.branch_b_id,
        }
    }
}

/// What recording a detected conflict did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChange {
    /// First detection of this pair.
    Created,
    /// The pair was resolved and conflicts again.
    Reopened,
    /// Still unresolved, but a different set of files conflicts.
    FilesChanged,
    /// Still unresolved with the same files; nothing was written.
    Unchanged,
}

impl std::fmt::Display for ConflictChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Reopened => write!(f, "reopened"),
            Self::FilesChanged => write!(f, "files_changed"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Sort and de-duplicate a list of file paths.
pub fn normalize_files<I, S>(files: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = files.into_iter().map(Into::into).collect();
    out.sort();
    out.dedup();
    out
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Outcome of one auto-merge of a source branch into a target branch.
/// The table is a per-run ledger and is purged at the start of each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merge {
    pub id: i64,
    pub source_branch_id: i64,
    pub target_branch_id: i64,
    pub successful: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Suppression rules
// ---------------------------------------------------------------------------

/// What a suppression rule mutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum SuppressionTarget {
    Branch(i64),
    Conflict(i64),
}

impl std::fmt::Display for SuppressionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Branch(id) => write!(f, "branch {}", id),
            Self::Conflict(id) => write!(f, "conflict {}", id),
        }
    }
}

/// A per-user notification mute. Unique per (user, target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionRule {
    pub id: i64,
    pub user_id: i64,
    pub target: SuppressionTarget,
    /// `None` suppresses indefinitely.
    pub suppress_until: Option<DateTime<Utc>>,
}

impl SuppressionRule {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.suppress_until {
            None => true,
            Some(until) => until > now,
        }
    }
}

// ---------------------------------------------------------------------------
// Watermarks
// ---------------------------------------------------------------------------

/// Watermark set to the start of the last completed detection run.
pub const LAST_CONFLICT_CHECK: &str = "last_conflict_check";

/// Watermark set to the start of the last completed auto-merge run.
pub const LAST_MERGE_ATTEMPTED: &str = "last_merge_attempted";

/// Per-repository watermark key, e.g. `acme/widgets:last_merge_attempted`.
pub fn watermark_key(repository: &str, name: &str) -> String {
    format!("{}:{}", repository, name)
}
