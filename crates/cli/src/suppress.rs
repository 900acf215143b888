//! `suppress` / `unsuppress` subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};

use branchwatch_core::db::Database;
use branchwatch_core::models::SuppressionTarget;
use branchwatch_core::SuppressionLedger;

#[derive(Args, Debug)]
pub struct Owner {
    /// Email of the user the rule belongs to.
    #[arg(long)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct Expiry {
    /// Suppress until this RFC 3339 timestamp.
    #[arg(long, conflicts_with = "days")]
    pub until: Option<String>,

    /// Suppress for this many days.
    #[arg(long)]
    pub days: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum SuppressTarget {
    /// Mute every conflict involving a branch.
    Branch {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        repository: String,
        /// Branch name.
        #[arg(long)]
        branch: String,
        #[command(flatten)]
        expiry: Expiry,
    },
    /// Mute one conflict.
    Conflict {
        #[command(flatten)]
        owner: Owner,
        /// Conflict ID, as shown by `branchwatch conflicts`.
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        expiry: Expiry,
    },
}

#[derive(Subcommand, Debug)]
pub enum UnsuppressTarget {
    /// Lift a branch rule.
    Branch {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        repository: String,
        #[arg(long)]
        branch: String,
    },
    /// Lift a conflict rule.
    Conflict {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        id: i64,
    },
}

fn parse_expiry(expiry: &Expiry) -> Result<Option<DateTime<Utc>>> {
    if let Some(until) = &expiry.until {
        let ts = DateTime::parse_from_rfc3339(until)
            .with_context(|| format!("invalid --until timestamp '{}'", until))?;
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    match expiry.days {
        Some(days) => Utc::now()
            .checked_add_signed(Duration::days(i64::from(days)))
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("--days {} is out of range", days)),
        None => Ok(None),
    }
}

fn resolve_user(db: &Database, email: &str) -> Result<i64> {
    Ok(db
        .get_user_by_email(email)
        .context("failed to look up user")?
        .ok_or_else(|| anyhow::anyhow!("no user with email '{}'", email))?
        .id)
}

fn resolve_branch(db: &Database, repository: &str, branch: &str) -> Result<SuppressionTarget> {
    let repo = db
        .get_repository(repository)
        .context("failed to look up repository")?
        .ok_or_else(|| anyhow::anyhow!("repository '{}' has not been run yet", repository))?;
    let branch = db
        .get_branch_by_name(repo.id, branch)
        .context("failed to look up branch")?
        .ok_or_else(|| anyhow::anyhow!("branch '{}' not found in '{}'", branch, repository))?;
    Ok(SuppressionTarget::Branch(branch.id))
}

fn resolve_conflict(db: &Database, id: i64) -> Result<SuppressionTarget> {
    db.get_conflict_by_id(id)
        .context("failed to look up conflict")?
        .ok_or_else(|| anyhow::anyhow!("conflict {} not found", id))?;
    Ok(SuppressionTarget::Conflict(id))
}

pub fn suppress(db: Arc<Database>, target: SuppressTarget) -> Result<()> {
    let (user, target, until) = match &target {
        SuppressTarget::Branch {
            owner,
            repository,
            branch,
            expiry,
        } => (
            resolve_user(&db, &owner.user)?,
            resolve_branch(&db, repository, branch)?,
            parse_expiry(expiry)?,
        ),
        SuppressTarget::Conflict { owner, id, expiry } => (
            resolve_user(&db, &owner.user)?,
            resolve_conflict(&db, *id)?,
            parse_expiry(expiry)?,
        ),
    };

    let ledger = SuppressionLedger::new(db);
    ledger
        .suppress(user, target, until)
        .context("failed to save suppression rule")?;
    match until {
        Some(ts) => println!("Suppressed {} until {}", target, ts.format("%Y-%m-%d %H:%M UTC")),
        None => println!("Suppressed {} indefinitely", target),
    }
    Ok(())
}

pub fn unsuppress(db: Arc<Database>, target: UnsuppressTarget) -> Result<()> {
    let (user, target) = match &target {
        UnsuppressTarget::Branch {
            owner,
            repository,
            branch,
        } => (
            resolve_user(&db, &owner.user)?,
            resolve_branch(&db, repository, branch)?,
        ),
        UnsuppressTarget::Conflict { owner, id } => {
            (resolve_user(&db, &owner.user)?, SuppressionTarget::Conflict(*id))
        }
    };

    let ledger = SuppressionLedger::new(db);
    if ledger.lift(user, target).context("failed to remove rule")? {
        println!("Lifted suppression of {}", target);
    } else {
        println!("No suppression rule for {}", target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expiry() {
        let none = Expiry { until: None, days: None };
        assert_eq!(parse_expiry(&none).unwrap(), None);

        let until = Expiry {
            until: Some("2030-01-02T03:04:05Z".into()),
            days: None,
        };
        assert_eq!(
            parse_expiry(&until).unwrap().unwrap().to_rfc3339(),
            "2030-01-02T03:04:05+00:00"
        );

        let bad = Expiry {
            until: Some("tomorrow".into()),
            days: None,
        };
        assert!(parse_expiry(&bad).is_err());

        let days = Expiry { until: None, days: Some(3) };
        assert!(parse_expiry(&days).unwrap().unwrap() > Utc::now() + Duration::days(2));
    }

    #[test]
    fn test_out_of_range_days_is_an_error() {
        let huge = Expiry {
            until: None,
            days: Some(u32::MAX),
        };
        let err = parse_expiry(&huge).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
