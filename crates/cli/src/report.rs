//! Read-only views over recorded conflicts and merges.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use branchwatch_core::db::{ConflictFilter, Database, MergeFilter, TimeWindow};
use branchwatch_core::models::{watermark_key, Repository, LAST_MERGE_ATTEMPTED};

fn find_repository(db: &Database, name: &str) -> Result<Repository> {
    db.get_repository(name)
        .context("failed to look up repository")?
        .ok_or_else(|| anyhow::anyhow!("repository '{}' has not been run yet", name))
}

fn branch_names(db: &Database, repository_id: i64) -> Result<HashMap<i64, String>> {
    Ok(db
        .list_branches(repository_id)
        .context("failed to list branches")?
        .into_iter()
        .map(|b| (b.id, b.name))
        .collect())
}

fn user_id(db: &Database, email: &str) -> Result<i64> {
    Ok(db
        .get_user_by_email(email)
        .context("failed to look up user")?
        .ok_or_else(|| anyhow::anyhow!("no user with email '{}'", email))?
        .id)
}

/// List conflicts of a repository, optionally as seen by one user.
pub fn list_conflicts(
    db: &Database,
    repository: &str,
    resolved: bool,
    since: Option<DateTime<Utc>>,
    user_email: Option<&str>,
) -> Result<()> {
    let repo = find_repository(db, repository)?;
    let names = branch_names(db, repo.id)?;

    let mut filter = ConflictFilter::new(repo.id, resolved);
    if let Some(since) = since {
        filter.window = TimeWindow::ChangedAfter(since);
    }
    if let Some(email) = user_email {
        filter.suppressed_for_user = Some(user_id(db, email)?);
    }
    let conflicts = db
        .list_conflicts(&filter, Utc::now())
        .context("failed to list conflicts")?;

    if conflicts.is_empty() {
        println!("No {} conflicts.", if resolved { "resolved" } else { "unresolved" });
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Branch A", "Branch B", "Files", "Changed"]);

    let unknown = "?".to_string();
    for c in &conflicts {
        table.add_row(vec![
            Cell::new(c.id),
            Cell::new(names.get(&c.branch_a_id).unwrap_or(&unknown)),
            Cell::new(names.get(&c.branch_b_id).unwrap_or(&unknown)),
            Cell::new(c.conflicting_files.join("\n")),
            Cell::new(c.status_last_changed.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!("{}", table);
    println!("{} conflict(s)", conflicts.len());
    Ok(())
}

/// List merges recorded by the last auto-merge run.
pub fn list_merges(
    db: &Database,
    repository: &str,
    failed_only: bool,
    owner_email: Option<&str>,
) -> Result<()> {
    let repo = find_repository(db, repository)?;
    let names = branch_names(db, repo.id)?;

    let filter = MergeFilter {
        repository_id: repo.id,
        successful: failed_only.then_some(false),
        created_after: None,
        target_owner_id: owner_email.map(|e| user_id(db, e)).transpose()?,
    };
    let merges = db.list_merges(&filter).context("failed to list merges")?;

    let last_run = db
        .get_watermark(&watermark_key(repository, LAST_MERGE_ATTEMPTED))
        .context("failed to read watermark")?;
    match last_run {
        Some(ts) => println!("Last auto-merge run: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last auto-merge run: never"),
    }

    if merges.is_empty() {
        println!("No merges recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Source", "Target", "Result", "At"]);

    let unknown = "?".to_string();
    for m in &merges {
        let result = if m.successful {
            Cell::new("merged").fg(Color::Green)
        } else {
            Cell::new("conflict").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(names.get(&m.source_branch_id).unwrap_or(&unknown)),
            Cell::new(names.get(&m.target_branch_id).unwrap_or(&unknown)),
            result,
            Cell::new(m.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!("{}", table);
    Ok(())
}
