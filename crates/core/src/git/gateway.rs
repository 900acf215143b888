//! The seam between the reconciliation components and the version-control
//! tool.
//!
//! Every operation that touches the shared working copy goes through a
//! [`RepositoryGateway`]. Methods take `&mut self` so a single gateway can
//! never have two working-copy operations in flight at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::GitError;
use crate::patterns::PatternSet;

/// One entry of the remote branch listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    /// Repository the listing was produced for.
    pub repository_name: String,
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub author_name: String,
    pub author_email: String,
}

/// Options for [`RepositoryGateway::attempt_merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Merge this tag instead of the source branch head.
    pub source_tag: Option<String>,
    /// Leave a successful merge committed in the working copy so it can be
    /// pushed. Any other outcome is always reset.
    pub keep_changes_on_success: bool,
}

/// Result of simulating a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to merge, or a failure with no recognisable conflict.
    NoOp,
    /// The merge stopped on conflicts in these files.
    Conflict(Vec<String>),
    /// The merge applied cleanly and changed the target.
    Success,
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn conflicting_files(&self) -> Option<&[String]> {
        match self {
            Self::Conflict(files) => Some(files),
            _ => None,
        }
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOp => write!(f, "no-op"),
            Self::Conflict(files) => write!(f, "conflict ({} files)", files.len()),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Operations the engine needs from one repository's working copy.
#[async_trait]
pub trait RepositoryGateway: Send {
    /// Name of the repository this gateway is bound to.
    fn repository_name(&self) -> &str;

    /// Clone or fetch the local mirror and check out `default_branch`.
    async fn sync_local_mirror(&mut self, default_branch: &str) -> Result<(), GitError>;

    /// List every remote branch. A malformed record fails the whole call.
    async fn list_remote_branches(&mut self) -> Result<Vec<BranchInfo>, GitError>;

    /// Merge `source` (or `options.source_tag`) into `target` without
    /// committing. Unless changes are kept, the working copy is reset to
    /// the target's remote reference before returning, on every path.
    async fn attempt_merge(
        &mut self,
        target: &str,
        source: &str,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, GitError>;

    /// Files that differ between `branch` and its merge base with `ancestor`.
    async fn diff_files(&mut self, branch: &str, ancestor: &str) -> Result<Vec<String>, GitError>;

    /// Push the local state of `target`. Returns `false` when the remote
    /// was already up to date. `dry_run` skips the network call.
    async fn push(&mut self, target: &str, dry_run: bool) -> Result<bool, GitError>;

    /// Hard-reset the working copy to `branch`'s remote reference.
    async fn reset_hard(&mut self, branch: &str) -> Result<(), GitError>;

    /// Newest tag, by creation date, whose name matches `pattern`.
    async fn latest_tag(&mut self, pattern: &PatternSet) -> Result<Option<String>, GitError>;

    /// Best-effort return to a clean tree after an aborted operation.
    async fn discard_local_changes(&mut self) -> Result<(), GitError>;
}
