//! The `run` subcommand: one engine run per selected repository.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use branchwatch_core::config::{AppConfig, RepositorySettings};
use branchwatch_core::db::Database;
use branchwatch_core::engine::{BranchEngine, RunMode, RunOutcome, RunReport};
use branchwatch_core::git::GitClient;

use crate::signals;

/// Run `mode` for every selected repository in configuration order.
///
/// A failing repository does not stop the others; the command fails if
/// any of them did. An interrupt resets the current working copy and
/// stops immediately.
pub async fn run_repositories(
    config: &AppConfig,
    settings: Vec<RepositorySettings>,
    db: Arc<Database>,
    only: Option<&str>,
    mode: RunMode,
    dry_run: bool,
) -> Result<()> {
    let selected: Vec<RepositorySettings> = settings
        .into_iter()
        .filter(|s| only.map_or(true, |name| s.name == name))
        .collect();
    if selected.is_empty() {
        match only {
            Some(name) => bail!("repository '{}' is not configured", name),
            None => bail!("no repositories configured"),
        }
    }

    let total = selected.len();
    let mut failed = Vec::new();

    for repo in selected {
        let repo = Arc::new(repo);
        let gateway = GitClient::for_repository(&config.engine, &repo);
        let engine = BranchEngine::new(db.clone(), repo.clone(), gateway);
        info!(repository = %repo.name, %mode, dry_run, "starting run");

        tokio::select! {
            result = engine.run(mode, dry_run) => match result {
                Ok(report) => print_report(&report),
                Err(e) => {
                    let configuration = e.is_configuration();
                    error!(repository = %repo.name, error = %e, configuration, "run failed");
                    eprintln!("{}: {} run failed: {}", repo.name, mode, e);
                    if configuration {
                        eprintln!("  check the [[repositories]] entry for '{}'", repo.name);
                    }
                    failed.push(repo.name.clone());
                }
            },
            _ = signals::wait_for_shutdown() => {
                warn!(repository = %repo.name, "run interrupted; resetting working copy");
                if let Err(e) = engine.discard_local_changes().await {
                    warn!(error = %e, "failed to reset working copy after interrupt");
                }
                bail!("run interrupted while processing '{}'", repo.name);
            }
        }
    }

    if !failed.is_empty() {
        bail!(
            "{} of {} repositories failed: {}",
            failed.len(),
            total,
            failed.join(", ")
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let elapsed = report.finished_at - report.started_at;
    println!("{}", report.repository);
    println!("  Branches       : {}", report.branches);
    if !report.deleted_branches.is_empty() {
        println!("  Deleted        : {}", report.deleted_branches.join(", "));
    }

    match &report.outcome {
        RunOutcome::Detect(d) => {
            println!("  Targets        : {}", d.targets);
            println!("  Pairs checked  : {}", d.pairs_checked);
            println!(
                "  Conflicts      : {} new, {} reopened, {} changed, {} unchanged",
                d.created, d.reopened, d.files_changed, d.unchanged
            );
            println!("  Ignored        : {}", d.ignored);
            println!("  Cleared        : {}", d.cleared);
            if !d.truncated_targets.is_empty() {
                println!("  Scan limit hit : {}", d.truncated_targets.join(", "));
            }
        }
        RunOutcome::Merge(m) if m.source_missing => {
            println!("  Source branch '{}' not found; nothing merged", m.source_branch);
        }
        RunOutcome::Merge(m) => {
            let source = match &m.source_tag {
                Some(tag) => format!("{} (tag {})", m.source_branch, tag),
                None => m.source_branch.clone(),
            };
            println!("  Source         : {}", source);
            println!("  Attempted      : {}", m.attempted);
            println!(
                "  Merged         : {}{}",
                m.merged.len(),
                if m.dry_run { " (dry run, not pushed)" } else { "" }
            );
            println!("  Conflicted     : {}", m.conflicted.len());
            println!("  Up to date     : {}", m.up_to_date);
            for target in &m.conflicted {
                println!("    conflict: {}", target);
            }
        }
    }
    println!("  Duration       : {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    println!();
}
