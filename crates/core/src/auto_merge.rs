//! Cascading auto-merge of one source branch into every eligible target.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{self, Reconciled};
use crate::config::{AutoMergeSettings, RepositorySettings};
use crate::db::Database;
use crate::errors::EngineError;
use crate::git::{MergeOptions, MergeOutcome, RepositoryGateway};
use crate::models::{watermark_key, Branch, Merge, LAST_MERGE_ATTEMPTED};

/// Summary of one auto-merge run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub source_branch: String,
    /// Tag the run was pinned to, if any.
    pub source_tag: Option<String>,
    /// `true` when the source branch does not exist and nothing was done.
    pub source_missing: bool,
    pub dry_run: bool,
    pub attempted: usize,
    pub merged: Vec<String>,
    pub conflicted: Vec<String>,
    pub up_to_date: usize,
    pub merges: Vec<Merge>,
}

/// Merges the configured source into the repository's target branches.
pub struct AutoMerger {
    db: Arc<Database>,
    settings: Arc<RepositorySettings>,
}

impl AutoMerger {
    /// Fails when the repository has no `auto_merge` section.
    pub fn new(db: Arc<Database>, settings: Arc<RepositorySettings>) -> Result<Self, EngineError> {
        if settings.auto_merge.is_none() {
            return Err(EngineError::AutoMergeNotConfigured {
                repository: settings.name.clone(),
            });
        }
        Ok(Self { db, settings })
    }

    fn auto_merge(&self) -> Result<&AutoMergeSettings, EngineError> {
        self.settings
            .auto_merge
            .as_ref()
            .ok_or_else(|| EngineError::AutoMergeNotConfigured {
                repository: self.settings.name.clone(),
            })
    }

    /// Clear the merge ledger of this repository. Called before
    /// reconciliation so each run starts from an empty ledger.
    pub fn purge(&self) -> Result<usize, EngineError> {
        match self.db.get_repository(&self.settings.name)? {
            Some(repo) => Ok(self.db.delete_merges_for_repository(repo.id)?),
            None => Ok(0),
        }
    }

    /// Cascade the source into every eligible target of `reconciled`.
    /// `force_dry_run` skips pushes even when the configuration does not.
    #[instrument(skip_all, fields(repository = %self.settings.name))]
    pub async fn run(
        &self,
        gateway: &mut dyn RepositoryGateway,
        reconciled: &Reconciled,
        force_dry_run: bool,
    ) -> Result<MergeReport, EngineError> {
        let config = self.auto_merge()?;
        let started_at = reconciled.started_at;
        let mut report = MergeReport {
            source_branch: config.source_branch.clone(),
            dry_run: config.dry_run || force_dry_run,
            ..Default::default()
        };

        let source = match resolve_source(&reconciled.branches, &config.source_branch)? {
            Some(source) => source,
            None => {
                info!(source = %config.source_branch, "source branch not found; nothing to merge");
                report.source_missing = true;
                return Ok(report);
            }
        };

        // Pin the tag once so every target receives the same reference.
        if let Some(pattern) = &config.source_tag {
            let tag = gateway.latest_tag(pattern).await?.ok_or_else(|| {
                EngineError::NoMatchingTag {
                    pattern: config.source_tag_pattern.clone().unwrap_or_default(),
                }
            })?;
            info!(%tag, "pinned source tag");
            report.source_tag = Some(tag);
        }

        let eligible = catalog::filter(&reconciled.branches, &self.settings.branches, started_at);
        let targets = catalog::filter(&eligible, &config.targets, started_at);
        let options = MergeOptions {
            source_tag: report.source_tag.clone(),
            keep_changes_on_success: true,
        };

        let mut processed = Vec::new();
        for target in &targets {
            if target.id == source.id {
                continue;
            }
            if target.repository_id != source.repository_id {
                return Err(EngineError::CrossRepositoryMerge {
                    source_branch: source.name.clone(),
                    target_branch: target.name.clone(),
                });
            }

            report.attempted += 1;
            let outcome = gateway
                .attempt_merge(&target.name, &source.name, &options)
                .await?;

            match outcome {
                MergeOutcome::Success => {
                    if !gateway.push(&target.name, report.dry_run).await? {
                        return Err(EngineError::PushDivergence {
                            source_branch: source.name.clone(),
                            target_branch: target.name.clone(),
                        });
                    }
                    let merge = self.db.insert_merge(source.id, target.id, true, Utc::now())?;
                    info!(target = %target.name, dry_run = report.dry_run, "merged");
                    report.merged.push(target.name.clone());
                    report.merges.push(merge);
                }
                MergeOutcome::Conflict(files) => {
                    gateway.reset_hard(&target.name).await?;
                    let merge = self.db.insert_merge(source.id, target.id, false, Utc::now())?;
                    warn!(target = %target.name, files = files.len(), "merge conflicts; target left unchanged");
                    report.conflicted.push(target.name.clone());
                    report.merges.push(merge);
                }
                MergeOutcome::NoOp => {
                    debug!(target = %target.name, "already up to date");
                    report.up_to_date += 1;
                }
            }
            processed.push(target.id);
        }

        self.db.mark_branches_tested(&processed, started_at)?;
        self.db.set_watermark(
            &watermark_key(&self.settings.name, LAST_MERGE_ATTEMPTED),
            started_at,
        )?;

        info!(
            attempted = report.attempted,
            merged = report.merged.len(),
            conflicted = report.conflicted.len(),
            up_to_date = report.up_to_date,
            "auto-merge finished"
        );
        Ok(report)
    }
}

/// Find the source branch by exact name. More than one match is fatal.
fn resolve_source<'a>(branches: &'a [Branch], name: &str) -> Result<Option<&'a Branch>, EngineError> {
    let matches: Vec<&Branch> = branches.iter().filter(|b| b.name == name).collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0])),
        n => Err(EngineError::AmbiguousSourceBranch {
            name: name.to_string(),
            matches: n,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BranchCatalog;
    use crate::config::{AutoMergeConfig, RepositoryConfig};
    use crate::db::MergeFilter;
    use crate::git::fake::{Call, FakeGateway};
    use chrono::{DateTime, TimeZone};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn settings(auto_merge: AutoMergeConfig) -> Arc<RepositorySettings> {
        Arc::new(
            RepositoryConfig {
                name: "acme/widgets".into(),
                remote_url: "/srv/git/widgets.git".into(),
                default_branch: "source".into(),
                branches: Default::default(),
                conflicts: Default::default(),
                auto_merge: Some(auto_merge),
            }
            .compile()
            .unwrap(),
        )
    }

    fn am(source: &str) -> AutoMergeConfig {
        AutoMergeConfig {
            source_branch: source.into(),
            source_tag_pattern: None,
            ignore_target_patterns: vec![],
            only_target_patterns: vec![],
            dry_run: false,
        }
    }

    async fn run(
        cfg: AutoMergeConfig,
        gw: &mut FakeGateway,
    ) -> (Arc<Database>, Reconciled, Result<MergeReport, EngineError>) {
        let settings = settings(cfg);
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let catalog = BranchCatalog::new(db.clone(), settings.clone());
        let merger = AutoMerger::new(db.clone(), settings).unwrap();
        merger.purge().unwrap();
        let reconciled = catalog.reconcile(gw).await.unwrap();
        let result = merger.run(gw, &reconciled, false).await;
        (db, reconciled, result)
    }

    fn cascade_gateway() -> FakeGateway {
        FakeGateway::new("acme/widgets")
            .with_branch("source", "s@example.com", t(1))
            .with_branch("target/0", "a@example.com", t(1))
            .with_branch("target/1", "b@example.com", t(1))
            .with_outcome(
                "target/0",
                "source",
                MergeOutcome::Conflict(vec!["src/lib.rs".into()]),
            )
            .with_outcome("target/1", "source", MergeOutcome::Success)
    }

    #[tokio::test]
    async fn test_cascade_records_one_failure_and_one_success() {
        let mut gw = cascade_gateway();
        let (db, r, result) = run(am("source"), &mut gw).await;
        let report = result.unwrap();

        assert_eq!(report.conflicted, vec!["target/0".to_string()]);
        assert_eq!(report.merged, vec!["target/1".to_string()]);
        assert_eq!(gw.count(|c| matches!(c, Call::Push { .. })), 1);
        assert_eq!(gw.count(|c| matches!(c, Call::Reset(_))), 1);
        assert_eq!(
            gw.count(|c| matches!(c, Call::Merge { keep: true, .. })),
            2
        );

        let id = |name: &str| r.branches.iter().find(|b| b.name == name).unwrap().id;
        let merges = db
            .list_merges(&MergeFilter {
                repository_id: r.repository.id,
                ..Default::default()
            })
            .unwrap();
        let mut summary: Vec<(i64, i64, bool)> = merges
            .iter()
            .map(|m| (m.source_branch_id, m.target_branch_id, m.successful))
            .collect();
        summary.sort();
        assert_eq!(
            summary,
            vec![
                (id("source"), id("target/0"), false),
                (id("source"), id("target/1"), true)
            ]
        );
        assert_eq!(
            db.get_watermark("acme/widgets:last_merge_attempted").unwrap(),
            Some(r.started_at)
        );
    }

    #[tokio::test]
    async fn test_never_merges_source_into_itself() {
        let mut gw = cascade_gateway();
        run(am("source"), &mut gw).await.2.unwrap();
        assert!(gw.merges().iter().all(|(target, _)| target != "source"));
    }

    #[tokio::test]
    async fn test_noop_records_nothing() {
        let mut gw = FakeGateway::new("acme/widgets")
            .with_branch("source", "s@example.com", t(1))
            .with_branch("target", "a@example.com", t(1));
        let (db, r, result) = run(am("source"), &mut gw).await;
        let report = result.unwrap();
        assert_eq!(report.up_to_date, 1);
        assert!(db
            .list_merges(&MergeFilter {
                repository_id: r.repository.id,
                ..Default::default()
            })
            .unwrap()
            .is_empty());
        assert_eq!(gw.count(|c| matches!(c, Call::Push { .. })), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_not_an_error() {
        let mut gw = FakeGateway::new("acme/widgets").with_branch("target", "a@example.com", t(1));
        let (_, _, result) = run(am("source"), &mut gw).await;
        let report = result.unwrap();
        assert!(report.source_missing);
        assert!(gw.merges().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_source_in_listing_is_ambiguous() {
        let mut gw = FakeGateway::new("acme/widgets")
            .with_branch("source", "s@example.com", t(1))
            .with_branch("source", "s@example.com", t(1))
            .with_branch("target", "a@example.com", t(1));
        let (_, _, result) = run(am("source"), &mut gw).await;
        assert!(matches!(
            result,
            Err(EngineError::AmbiguousSourceBranch { matches: 2, .. })
        ));
        assert!(gw.merges().is_empty());
    }

    #[tokio::test]
    async fn test_push_without_effect_is_fatal() {
        let mut gw = cascade_gateway();
        gw.push_results.insert("target/1".into(), false);
        let (_, _, result) = run(am("source"), &mut gw).await;
        assert!(matches!(result, Err(EngineError::PushDivergence { .. })));
    }

    #[tokio::test]
    async fn test_tag_is_pinned_once_for_every_target() {
        let mut gw = cascade_gateway();
        gw.tags = vec!["v2.1".into(), "nightly".into(), "v2.0".into()];
        let cfg = AutoMergeConfig {
            source_tag_pattern: Some("^v[0-9]".into()),
            ..am("source")
        };
        let report = run(cfg, &mut gw).await.2.unwrap();
        assert_eq!(report.source_tag.as_deref(), Some("v2.1"));
        assert_eq!(gw.count(|c| matches!(c, Call::LatestTag)), 1);
        assert_eq!(
            gw.count(|c| matches!(c, Call::Merge { tag: Some(tag), .. } if tag == "v2.1")),
            2
        );
    }

    #[tokio::test]
    async fn test_missing_tag_is_fatal() {
        let mut gw = cascade_gateway();
        let cfg = AutoMergeConfig {
            source_tag_pattern: Some("^release-".into()),
            ..am("source")
        };
        let result = run(cfg, &mut gw).await.2;
        assert!(matches!(result, Err(EngineError::NoMatchingTag { .. })));
    }

    #[tokio::test]
    async fn test_target_patterns_and_dry_run() {
        let mut gw = cascade_gateway();
        let cfg = AutoMergeConfig {
            ignore_target_patterns: vec!["/0$".into()],
            dry_run: true,
            ..am("source")
        };
        let report = run(cfg, &mut gw).await.2.unwrap();
        assert_eq!(report.attempted, 1);
        assert!(gw.calls.contains(&Call::Push {
            target: "target/1".into(),
            dry_run: true
        }));
    }

    #[test]
    fn test_unconfigured_repository_rejected() {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut s = (*settings(am("source"))).clone();
        s.auto_merge = None;
        assert!(matches!(
            AutoMerger::new(db, Arc::new(s)),
            Err(EngineError::AutoMergeNotConfigured { .. })
        ));
    }

    #[test]
    fn test_cross_repository_merge_rejected_by_ledger() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let (a, _) = db.find_or_create_repository("acme/widgets", t(1)).unwrap();
        let (b, _) = db.find_or_create_repository("acme/gadgets", t(1)).unwrap();
        let (u, _) = db.find_or_create_user("x", "x@example.com", t(1)).unwrap();
        let (src, _) = db.upsert_branch(a.id, "source", u.id, t(1), t(1)).unwrap();
        let (dst, _) = db.upsert_branch(b.id, "target", u.id, t(1), t(1)).unwrap();
        let err: EngineError = db.insert_merge(src.id, dst.id, true, t(1)).unwrap_err().into();
        assert!(matches!(err, EngineError::Database(_)));
    }
}
