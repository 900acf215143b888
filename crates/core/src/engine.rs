//! The per-repository run engine.
//!
//! A run reconciles the branch catalog and then performs exactly one of
//! conflict detection or auto-merge. The gateway sits behind an async mutex
//! so only one operation touches the working copy at a time, including the
//! recovery reset after a failed or cancelled run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::auto_merge::{AutoMerger, MergeReport};
use crate::catalog::BranchCatalog;
use crate::config::RepositorySettings;
use crate::conflict::{ConflictDetector, DetectionReport};
use crate::db::Database;
use crate::errors::{EngineError, GitError};
use crate::git::RepositoryGateway;

/// What a run does after reconciling branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Detect,
    Merge,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detect => write!(f, "detect"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunOutcome {
    Detect(DetectionReport),
    Merge(MergeReport),
}

/// Result of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub repository: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub branches: usize,
    pub deleted_branches: Vec<String>,
    pub outcome: RunOutcome,
}

/// Runs detection or auto-merge for one repository.
pub struct BranchEngine<G: RepositoryGateway> {
    db: Arc<Database>,
    settings: Arc<RepositorySettings>,
    gateway: Arc<Mutex<G>>,
    running: Arc<AtomicBool>,
}

impl<G: RepositoryGateway> BranchEngine<G> {
    pub fn new(db: Arc<Database>, settings: Arc<RepositorySettings>, gateway: G) -> Self {
        info!(repository = %settings.name, "initializing branch engine");
        Self {
            db,
            settings,
            gateway: Arc::new(Mutex::new(gateway)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute one run. On any error the working copy is reset on a
    /// best-effort basis before the error is returned.
    #[instrument(skip(self), fields(repository = %self.settings.name))]
    pub async fn run(&self, mode: RunMode, dry_run: bool) -> Result<RunReport, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning {
                repository: self.settings.name.clone(),
            });
        }
        let _guard = RunGuard(self.running.clone());

        let mut gateway = self.gateway.lock().await;
        let result = self.run_locked(&mut *gateway, mode, dry_run).await;

        if let Err(e) = &result {
            warn!(error = %e, "run failed; discarding local changes");
            if let Err(reset_err) = gateway.discard_local_changes().await {
                warn!(error = %reset_err, "failed to discard local changes");
            }
        }
        result
    }

    async fn run_locked(
        &self,
        gateway: &mut dyn RepositoryGateway,
        mode: RunMode,
        dry_run: bool,
    ) -> Result<RunReport, EngineError> {
        let catalog = BranchCatalog::new(self.db.clone(), self.settings.clone());

        let (reconciled, outcome) = match mode {
            RunMode::Detect => {
                let detector = ConflictDetector::new(self.db.clone(), self.settings.clone());
                let reconciled = catalog.reconcile(gateway).await?;
                let report = detector.run(gateway, &reconciled).await?;
                (reconciled, RunOutcome::Detect(report))
            }
            RunMode::Merge => {
                let merger = AutoMerger::new(self.db.clone(), self.settings.clone())?;
                let purged = merger.purge()?;
                info!(purged, "merge ledger cleared");
                let reconciled = catalog.reconcile(gateway).await?;
                let report = merger.run(gateway, &reconciled, dry_run).await?;
                (reconciled, RunOutcome::Merge(report))
            }
        };

        Ok(RunReport {
            repository: self.settings.name.clone(),
            started_at: reconciled.started_at,
            finished_at: Utc::now(),
            branches: reconciled.branches.len(),
            deleted_branches: reconciled.deleted,
            outcome,
        })
    }

    /// Reset the working copy. Used after a run was cancelled from outside.
    pub async fn discard_local_changes(&self) -> Result<(), GitError> {
        let mut gateway = self.gateway.lock().await;
        gateway.discard_local_changes().await
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
