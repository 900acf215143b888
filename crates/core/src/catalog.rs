//! Branch catalog: keeps the persisted branch table in step with the remote
//! and applies the configured name/date selection policy.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, info, instrument};

use crate::config::{BranchRules, RepositorySettings};
use crate::db::Database;
use crate::errors::EngineError;
use crate::git::RepositoryGateway;
use crate::models::{Branch, Repository};

/// Result of one reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub repository: Repository,
    /// Every branch present in the listing, ordered by name.
    pub branches: Vec<Branch>,
    /// Names of branches deleted because they vanished from the remote.
    pub deleted: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Why a branch was left out by [`filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// Matched this ignore pattern.
    Ignored(String),
    /// An allow-list is configured and the name matched none of it.
    NotAllowed,
    /// Not modified within the idle limit.
    Idle { max_idle_days: u32 },
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ignored(pattern) => write!(f, "matches ignore pattern '{}'", pattern),
            Self::NotAllowed => write!(f, "matches no allowed pattern"),
            Self::Idle { max_idle_days } => write!(f, "idle for more than {} days", max_idle_days),
        }
    }
}

/// The first rule excluding a branch, checked in priority order:
/// ignore list, then allow list, then idle limit.
pub fn exclusion(
    name: &str,
    last_modified: DateTime<Utc>,
    rules: &BranchRules,
    now: DateTime<Utc>,
) -> Option<Exclusion> {
    if let Some(pattern) = rules.ignore.first_match(name) {
        return Some(Exclusion::Ignored(pattern.to_string()));
    }
    if !rules.only.is_empty() && !rules.only.matches(name) {
        return Some(Exclusion::NotAllowed);
    }
    if rules.max_idle_days == 0 {
        return None;
    }
    // A cutoff before the representable range means no branch is idle.
    let cutoff = now.checked_sub_signed(Duration::days(i64::from(rules.max_idle_days)))?;
    if last_modified < cutoff {
        return Some(Exclusion::Idle {
            max_idle_days: rules.max_idle_days,
        });
    }
    None
}

/// Keep the branches no rule excludes, preserving order.
pub fn filter(branches: &[Branch], rules: &BranchRules, now: DateTime<Utc>) -> Vec<Branch> {
    branches
        .iter()
        .filter(|branch| match exclusion(&branch.name, branch.git_updated_at, rules, now) {
            Some(reason) => {
                debug!(branch = %branch.name, %reason, "branch excluded");
                false
            }
            None => true,
        })
        .cloned()
        .collect()
}

/// Reconciles the branch table of one repository.
pub struct BranchCatalog {
    db: Arc<Database>,
    settings: Arc<RepositorySettings>,
}

impl BranchCatalog {
    pub fn new(db: Arc<Database>, settings: Arc<RepositorySettings>) -> Self {
        Self { db, settings }
    }

    /// Sync the mirror, upsert every listed branch and delete the ones the
    /// remote no longer has.
    #[instrument(skip(self, gateway), fields(repository = %self.settings.name))]
    pub async fn reconcile(
        &self,
        gateway: &mut dyn RepositoryGateway,
    ) -> Result<Reconciled, EngineError> {
        // Stored timestamps keep microseconds; match them exactly.
        let started_at = Utc::now().trunc_subsecs(6);
        let name = &self.settings.name;

        if gateway.repository_name() != name {
            return Err(EngineError::RepositoryMismatch {
                expected: name.clone(),
                found: gateway.repository_name().to_string(),
            });
        }

        gateway.sync_local_mirror(&self.settings.default_branch).await?;
        let listing = gateway.list_remote_branches().await?;

        // Validate the whole listing before touching any state.
        if let Some(foreign) = listing.iter().find(|b| &b.repository_name != name) {
            return Err(EngineError::RepositoryMismatch {
                expected: name.clone(),
                found: foreign.repository_name.clone(),
            });
        }

        let (repository, _) = self.db.find_or_create_repository(name, started_at)?;
        let mut branches = Vec::with_capacity(listing.len());
        for info in &listing {
            let (author, _) =
                self.db
                    .find_or_create_user(&info.author_name, &info.author_email, started_at)?;
            let (branch, existed) = self.db.upsert_branch(
                repository.id,
                &info.name,
                author.id,
                info.last_modified,
                started_at,
            )?;
            if !existed {
                debug!(branch = %branch.name, "new branch");
            }
            branches.push(branch);
        }
        branches.sort_by(|a, b| a.name.cmp(&b.name));

        let deleted = self
            .db
            .delete_branches_not_seen_since(repository.id, started_at)?;

        info!(
            listed = branches.len(),
            deleted = deleted.len(),
            "branches reconciled"
        );
        Ok(Reconciled {
            repository,
            branches,
            deleted,
            started_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::git::fake::{Call, FakeGateway};
    use crate::patterns::PatternSet;
    use chrono::TimeZone;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn settings() -> Arc<RepositorySettings> {
        let cfg = RepositoryConfig {
            name: "acme/widgets".into(),
            remote_url: "/srv/git/widgets.git".into(),
            default_branch: "main".into(),
            branches: Default::default(),
            conflicts: Default::default(),
            auto_merge: None,
        };
        Arc::new(cfg.compile().unwrap())
    }

    fn setup() -> (Arc<Database>, BranchCatalog) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let catalog = BranchCatalog::new(db.clone(), settings());
        (db, catalog)
    }

    fn rules(ignore: &[&str], only: &[&str], max_idle_days: u32) -> BranchRules {
        BranchRules {
            ignore: PatternSet::compile("ignore", ignore).unwrap(),
            only: PatternSet::compile("only", only).unwrap(),
            max_idle_days,
        }
    }

    #[test]
    fn test_exclusion_priority() {
        let now = t(31);
        let r = rules(&["^wip/"], &["^feature/", "^wip/"], 10);
        assert_eq!(
            exclusion("wip/old", t(1), &r, now),
            Some(Exclusion::Ignored("^wip/".into()))
        );
        assert_eq!(exclusion("hotfix/x", t(30), &r, now), Some(Exclusion::NotAllowed));
        assert_eq!(
            exclusion("feature/old", t(1), &r, now),
            Some(Exclusion::Idle { max_idle_days: 10 })
        );
        assert_eq!(exclusion("feature/new", t(30), &r, now), None);
    }

    #[test]
    fn test_zero_idle_days_disables_staleness() {
        let r = rules(&[], &[], 0);
        assert_eq!(exclusion("ancient", t(1), &r, t(31)), None);
    }

    #[test]
    fn test_idle_limit_beyond_calendar_range_excludes_nothing() {
        let r = rules(&[], &[], u32::MAX);
        assert_eq!(exclusion("feature", t(1), &r, t(31)), None);
        assert_eq!(exclusion("feature", DateTime::<Utc>::MIN_UTC, &r, Utc::now()), None);
    }

    #[tokio::test]
    async fn test_reconcile_upserts_and_syncs_first() {
        let (db, catalog) = setup();
        let mut gw = FakeGateway::new("acme/widgets")
            .with_branch("main", "jane@example.com", t(1))
            .with_branch("feature/a", "bob@example.com", t(2));

        let result = catalog.reconcile(&mut gw).await.unwrap();
        assert_eq!(gw.calls[0], Call::Sync("main".into()));
        assert_eq!(gw.calls[1], Call::List);

        let names: Vec<&str> = result.branches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["feature/a", "main"]);
        assert!(result.branches.iter().all(|b| b.updated_at == result.started_at));
        assert!(result.branches.iter().all(Branch::is_untested));
        assert!(db.get_user_by_email("bob@example.com").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vanished_branch_is_deleted_with_its_conflicts() {
        let (db, catalog) = setup();
        let mut gw = FakeGateway::new("acme/widgets")
            .with_branch("main", "jane@example.com", t(1))
            .with_branch("feature/a", "bob@example.com", t(2));
        let first = catalog.reconcile(&mut gw).await.unwrap();

        let pair = crate::models::BranchPair::new(first.branches[0].id, first.branches[1].id).unwrap();
        let (conflict, _) = db
            .record_conflict(pair, &["x.rs".to_string()], first.started_at)
            .unwrap();

        gw.remove_branch("feature/a");
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = catalog.reconcile(&mut gw).await.unwrap();
        assert_eq!(second.deleted, vec!["feature/a".to_string()]);
        assert_eq!(db.list_branches(second.repository.id).unwrap().len(), 1);
        assert!(db.get_conflict_by_id(conflict.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_listing_is_rejected_before_any_write() {
        let (db, catalog) = setup();
        let mut gw = FakeGateway::new("acme/widgets").with_branch("main", "jane@example.com", t(1));
        gw.listing_repository = Some("acme/gadgets".into());

        let err = catalog.reconcile(&mut gw).await.unwrap_err();
        assert!(matches!(err, EngineError::RepositoryMismatch { .. }));
        assert!(err.is_configuration());
        assert!(db.get_repository("acme/widgets").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gateway_bound_to_other_repository() {
        let (_db, catalog) = setup();
        let mut gw = FakeGateway::new("acme/gadgets");
        let err = catalog.reconcile(&mut gw).await.unwrap_err();
        assert!(matches!(err, EngineError::RepositoryMismatch { .. }));
        assert!(gw.calls.is_empty());
    }

    #[test]
    fn test_filter_keeps_order() {
        let now = t(31);
        let branch = |id: i64, name: &str| Branch {
            id,
            repository_id: 1,
            name: name.into(),
            author_id: 1,
            git_updated_at: t(30),
            git_tested_at: None,
            created_at: t(30),
            updated_at: t(30),
        };
        let branches = vec![branch(1, "a"), branch(2, "skip-me"), branch(3, "c")];
        let kept = filter(&branches, &rules(&["^skip"], &[], 0), now);
        assert_eq!(kept.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 3]);
    }
}
