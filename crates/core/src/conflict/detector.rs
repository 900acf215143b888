//! Pairwise conflict search over the reconciled branch set.
//!
//! Every untested eligible branch is a target. Each target is merged with
//! the other eligible branches in turn, one probe at a time, through the
//! gateway. A probe never leaves changes behind; conflicts are written to
//! the conflicts table and pairs found clean are cleared once the whole
//! scan has finished.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::ignore::{inherited, matching_patterns, IgnoredFiles};
use crate::catalog::{self, Reconciled};
use crate::config::RepositorySettings;
use crate::db::Database;
use crate::errors::EngineError;
use crate::git::{MergeOptions, MergeOutcome, RepositoryGateway};
use crate::models::{watermark_key, Branch, BranchPair, Conflict, ConflictChange, LAST_CONFLICT_CHECK};

/// Summary of one detection run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub targets: usize,
    pub pairs_checked: usize,
    /// Targets whose scan stopped at the per-target limit.
    pub truncated_targets: Vec<String>,
    pub created: usize,
    pub reopened: usize,
    pub files_changed: usize,
    pub unchanged: usize,
    /// Conflicts found but not reported because every file was ignored.
    pub ignored: usize,
    pub cleared: usize,
    /// Conflicts whose status or files changed in this run.
    pub changed: Vec<Conflict>,
}

/// Searches for merge conflicts between the branches of one repository.
pub struct ConflictDetector {
    db: Arc<Database>,
    settings: Arc<RepositorySettings>,
}

impl ConflictDetector {
    pub fn new(db: Arc<Database>, settings: Arc<RepositorySettings>) -> Self {
        Self { db, settings }
    }

    /// Scan every untested eligible branch of `reconciled`.
    #[instrument(skip_all, fields(repository = %self.settings.name))]
    pub async fn run(
        &self,
        gateway: &mut dyn RepositoryGateway,
        reconciled: &Reconciled,
    ) -> Result<DetectionReport, EngineError> {
        let started_at = reconciled.started_at;
        let eligible = catalog::filter(&reconciled.branches, &self.settings.branches, started_at);
        let targets: Vec<&Branch> = eligible.iter().filter(|b| b.is_untested()).collect();
        let limit = self.settings.conflicts.maximum_branches_to_check;

        info!(
            eligible = eligible.len(),
            targets = targets.len(),
            limit = ?limit,
            "starting conflict detection"
        );

        let mut report = DetectionReport {
            targets: targets.len(),
            ..Default::default()
        };
        let mut probed: HashSet<BranchPair> = HashSet::new();
        let mut clean: Vec<BranchPair> = Vec::new();
        let mut completed: Vec<i64> = Vec::new();

        for target in targets {
            let mut checked = 0usize;
            let mut truncated = false;

            for source in eligible.iter().filter(|b| b.id != target.id) {
                let pair = BranchPair::new(target.id, source.id)?;
                if probed.contains(&pair) {
                    continue;
                }
                if limit.is_some_and(|max| checked >= max) {
                    truncated = true;
                    break;
                }
                checked += 1;
                probed.insert(pair);

                let outcome = gateway
                    .attempt_merge(&target.name, &source.name, &MergeOptions::default())
                    .await?;
                report.pairs_checked += 1;

                let files = match outcome {
                    MergeOutcome::Conflict(files) => files,
                    MergeOutcome::NoOp | MergeOutcome::Success => {
                        clean.push(pair);
                        continue;
                    }
                };

                let ignored = self.files_to_ignore(gateway, target, source, &files).await?;
                if ignored.covers(&files) {
                    debug!(
                        target = %target.name,
                        source = %source.name,
                        files = files.len(),
                        "every conflicting file is ignored"
                    );
                    report.ignored += 1;
                    clean.push(pair);
                    continue;
                }

                let (conflict, change) = self.db.record_conflict(pair, &files, Utc::now())?;
                info!(
                    target = %target.name,
                    source = %source.name,
                    files = files.len(),
                    ignored = ignored.len(),
                    %change,
                    "conflict detected"
                );
                match change {
                    ConflictChange::Created => report.created += 1,
                    ConflictChange::Reopened => report.reopened += 1,
                    ConflictChange::FilesChanged => report.files_changed += 1,
                    ConflictChange::Unchanged => report.unchanged += 1,
                }
                if change != ConflictChange::Unchanged {
                    report.changed.push(conflict);
                }
            }

            if truncated {
                warn!(target = %target.name, checked, "scan limit reached; remaining sources not checked");
                report.truncated_targets.push(target.name.clone());
            } else {
                completed.push(target.id);
            }
        }

        let now = Utc::now();
        for pair in clean {
            if self.db.clear_conflict(pair, now)? {
                debug!(low = pair.low(), high = pair.high(), "conflict cleared");
                report.cleared += 1;
            }
        }
        self.db.mark_branches_tested(&completed, started_at)?;
        self.db.set_watermark(
            &watermark_key(&self.settings.name, LAST_CONFLICT_CHECK),
            started_at,
        )?;

        info!(
            pairs = report.pairs_checked,
            created = report.created,
            reopened = report.reopened,
            cleared = report.cleared,
            "conflict detection finished"
        );
        Ok(report)
    }

    async fn files_to_ignore(
        &self,
        gateway: &mut dyn RepositoryGateway,
        target: &Branch,
        source: &Branch,
        files: &[String],
    ) -> Result<IgnoredFiles, EngineError> {
        let mut ignored = IgnoredFiles {
            by_pattern: matching_patterns(files, &self.settings.conflicts.ignore_files),
            ..Default::default()
        };
        if ignored.covers(files) {
            return Ok(ignored);
        }

        if let Some(ancestor) = &self.settings.conflicts.inherited_ancestor_branch {
            if ancestor != &target.name && ancestor != &source.name {
                let target_diff = gateway.diff_files(&target.name, ancestor).await?;
                let source_diff = gateway.diff_files(&source.name, ancestor).await?;
                ignored.inherited = inherited(&target_diff, &source_diff);
            }
        }
        Ok(ignored)
    }
}
