//! branchwatch command-line tool.
//!
//! Runs branch reconciliation with conflict detection or auto-merge for the
//! configured repositories, inspects recorded conflicts and merges, manages
//! per-user suppression rules, and generates / validates configuration
//! files.

mod report;
mod run;
mod signals;
mod suppress;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use branchwatch_core::config::{AppConfig, RepositorySettings};
use branchwatch_core::db::Database;
use branchwatch_core::engine::RunMode;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// branchwatch command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "branchwatch",
    version,
    about = "Detect merge conflicts between branches and cascade automatic merges"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/branchwatch/config.toml"
    )]
    config: PathBuf,

    /// Override the log level from the configuration file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Search for pairwise merge conflicts.
    Detect,
    /// Merge the configured source branch into every target.
    Merge,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Detect => RunMode::Detect,
            ModeArg::Merge => RunMode::Merge,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile branches and run conflict detection or auto-merge.
    Run {
        /// What to do after reconciling.
        #[arg(value_enum)]
        mode: ModeArg,

        /// Only run this repository.
        #[arg(short, long)]
        repository: Option<String>,

        /// Merge locally but never push.
        #[arg(long)]
        dry_run: bool,
    },

    /// List recorded conflicts.
    Conflicts {
        #[arg(short, long)]
        repository: String,

        /// Show resolved conflicts instead of unresolved ones.
        #[arg(long)]
        resolved: bool,

        /// Only conflicts whose status changed after this RFC 3339 time.
        #[arg(long)]
        since: Option<String>,

        /// Hide conflicts this user (by email) has suppressed.
        #[arg(long)]
        user: Option<String>,
    },

    /// List merges recorded by the last auto-merge run.
    Merges {
        #[arg(short, long)]
        repository: String,

        /// Only merges into branches authored by this user (by email).
        #[arg(long)]
        user: Option<String>,

        /// Only merges that stopped on a conflict.
        #[arg(long)]
        failed: bool,
    },

    /// Mute conflict notifications for a branch or a single conflict.
    Suppress {
        #[command(subcommand)]
        target: suppress::SuppressTarget,
    },

    /// Remove a suppression rule.
    Unsuppress {
        #[command(subcommand)]
        target: suppress::UnsuppressTarget,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./branchwatch.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&cli.config)
        }
        command => {
            let (config, settings) = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.engine.log_level));
            let db = Arc::new(open_database(&config)?);

            match command {
                Commands::Run {
                    mode,
                    repository,
                    dry_run,
                } => {
                    run::run_repositories(
                        &config,
                        settings,
                        db,
                        repository.as_deref(),
                        mode.into(),
                        dry_run,
                    )
                    .await
                }
                Commands::Conflicts {
                    repository,
                    resolved,
                    since,
                    user,
                } => {
                    let since = since.as_deref().map(parse_timestamp).transpose()?;
                    report::list_conflicts(&db, &repository, resolved, since, user.as_deref())
                }
                Commands::Merges {
                    repository,
                    user,
                    failed,
                } => report::list_merges(&db, &repository, failed, user.as_deref()),
                Commands::Suppress { target } => suppress::suppress(db, target),
                Commands::Unsuppress { target } => suppress::unsuppress(db, target),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// Log to stderr so table output on stdout stays clean. `RUST_LOG` wins
/// over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<(AppConfig, Vec<RepositorySettings>)> {
    AppConfig::load_and_validate(path).context("failed to load configuration file")
}

fn open_database(config: &AppConfig) -> Result<Database> {
    std::fs::create_dir_all(&config.engine.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.engine.data_dir.display()
        )
    })?;
    let db = Database::new(config.engine.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# branchwatch configuration

[engine]
data_dir = "/var/lib/branchwatch"
log_level = "info"
git_binary = "git"
committer_name = "branchwatch"
committer_email = "branchwatch@example.com"

[[repositories]]
name = "acme/widgets"
remote_url = "git@github.com:acme/widgets.git"
default_branch = "main"

[repositories.branches]
# Regular expressions matched against branch names.
ignore_patterns = ["^dependabot/"]
only_patterns = []
# Branches idle longer than this are skipped. 0 disables the check.
max_idle_days = 60

[repositories.conflicts]
ignore_file_patterns = ["\\.lock$"]
# maximum_branches_to_check = 100
# inherited_ancestor_branch = "main"

# [repositories.auto_merge]
# source_branch = "main"
# source_tag_pattern = "^v[0-9]+"
# ignore_target_patterns = ["^release/"]
# only_target_patterns = []
# dry_run = false
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the [[repositories]] entries for your remotes");
    println!(
        "  2. Validate with: branchwatch validate --config {}",
        output.display()
    );
    println!(
        "  3. Run detection: branchwatch run detect --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    let settings = match config.validate() {
        Ok(settings) => {
            println!("  [OK] All patterns compile and required fields are valid");
            settings
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    };

    println!();
    println!("Engine:");
    println!("  Data directory: {}", config.engine.data_dir.display());
    println!("  Git binary    : {}", config.engine.git_binary);
    println!("  Log level     : {}", config.engine.log_level);

    for repo in &settings {
        println!();
        println!("Repository {}:", repo.name);
        println!("  Remote        : {}", repo.remote_url);
        println!("  Default branch: {}", repo.default_branch);
        println!(
            "  Branch rules  : {} ignore, {} only, idle limit {}",
            repo.branches.ignore.len(),
            repo.branches.only.len(),
            if repo.branches.max_idle_days == 0 {
                "off".to_string()
            } else {
                format!("{}d", repo.branches.max_idle_days)
            }
        );
        println!(
            "  Scan limit    : {}",
            repo.conflicts
                .maximum_branches_to_check
                .map(|n| n.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        match &repo.auto_merge {
            Some(am) => println!(
                "  Auto-merge    : from {}{}{}",
                am.source_branch,
                am.source_tag_pattern
                    .as_deref()
                    .map(|p| format!(" (tag /{}/)", p))
                    .unwrap_or_default(),
                if am.dry_run { ", dry run" } else { "" }
            ),
            None => println!("  Auto-merge    : not configured"),
        }
    }

    println!();
    println!("Configuration is valid.");
    Ok(())
}
