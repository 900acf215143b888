//! TOML-based configuration system for branchwatch.
//!
//! The file holds an `[engine]` section with process-wide settings and one
//! `[[repositories]]` table per repository to reconcile. Each repository
//! section is compiled into an immutable [`RepositorySettings`] (pattern
//! lists turned into [`PatternSet`]s) that the components receive at
//! construction time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::patterns::PatternSet;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Repositories to reconcile, in run order.
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Process-wide engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for persistent data (database, working copies).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name or path of the git executable.
    #[serde(default = "default_git_binary")]
    pub git_binary: String,

    /// Committer name used for automatic merge commits.
    #[serde(default = "default_committer_name")]
    pub committer_name: String,

    /// Committer email used for automatic merge commits.
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/branchwatch")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_git_binary() -> String {
    "git".into()
}
fn default_committer_name() -> String {
    "branchwatch".into()
}
fn default_committer_email() -> String {
    "branchwatch@localhost".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            git_binary: default_git_binary(),
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
        }
    }
}

impl EngineConfig {
    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("branchwatch.db")
    }

    /// Path of the local working copy for `repository`.
    pub fn working_copy_path(&self, repository: &str) -> PathBuf {
        self.data_dir
            .join("repositories")
            .join(repository.replace(['/', '\\', ':'], "__"))
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// One repository to reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository name, e.g. `acme/widgets`. Identifies persisted state.
    pub name: String,

    /// Clone URL (or local path) of the remote.
    pub remote_url: String,

    /// Branch checked out after every mirror sync.
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Branch selection policy.
    #[serde(default)]
    pub branches: BranchRulesConfig,

    /// Conflict detection settings.
    #[serde(default)]
    pub conflicts: ConflictConfig,

    /// Cascading auto-merge settings. Absent means auto-merge is unavailable
    /// for this repository.
    #[serde(default)]
    pub auto_merge: Option<AutoMergeConfig>,
}

fn default_branch() -> String {
    "master".into()
}

/// Branch name/date filtering policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchRulesConfig {
    /// Branches matching any of these are excluded.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// When non-empty, only branches matching one of these are included.
    #[serde(default)]
    pub only_patterns: Vec<String>,

    /// Branches not modified in this many days are excluded (0 = no limit).
    #[serde(default)]
    pub max_idle_days: u32,
}

/// Conflict detection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Conflicting files matching any of these are not reported.
    #[serde(default)]
    pub ignore_file_patterns: Vec<String>,

    /// Upper bound on source branches probed per target branch per run.
    #[serde(default)]
    pub maximum_branches_to_check: Option<usize>,

    /// Branch against which both sides of a conflict are diffed to find
    /// inherited conflicting files. Unset disables that exclusion.
    #[serde(default)]
    pub inherited_ancestor_branch: Option<String>,
}

/// Cascading auto-merge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMergeConfig {
    /// Exact name of the branch merged into every target.
    pub source_branch: String,

    /// When set, merge the newest tag matching this pattern instead of the
    /// branch head.
    #[serde(default)]
    pub source_tag_pattern: Option<String>,

    /// Target branches matching any of these are skipped.
    #[serde(default)]
    pub ignore_target_patterns: Vec<String>,

    /// When non-empty, only matching target branches are merged into.
    #[serde(default)]
    pub only_target_patterns: Vec<String>,

    /// Skip the network push; merges are still attempted and recorded.
    #[serde(default)]
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Compiled settings
// ---------------------------------------------------------------------------

/// Compiled branch filtering rules.
#[derive(Debug, Clone, Default)]
pub struct BranchRules {
    pub ignore: PatternSet,
    pub only: PatternSet,
    pub max_idle_days: u32,
}

/// Compiled conflict detection settings.
#[derive(Debug, Clone, Default)]
pub struct ConflictSettings {
    pub ignore_files: PatternSet,
    pub maximum_branches_to_check: Option<usize>,
    pub inherited_ancestor_branch: Option<String>,
}

/// Compiled auto-merge settings.
#[derive(Debug, Clone)]
pub struct AutoMergeSettings {
    pub source_branch: String,
    pub source_tag: Option<PatternSet>,
    pub source_tag_pattern: Option<String>,
    pub targets: BranchRules,
    pub dry_run: bool,
}

/// Immutable, compiled view of one repository section.
#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub name: String,
    pub remote_url: String,
    pub default_branch: String,
    pub branches: BranchRules,
    pub conflicts: ConflictSettings,
    pub auto_merge: Option<AutoMergeSettings>,
}

/// Upper bound accepted for `branches.max_idle_days` (about a century).
pub const MAX_IDLE_DAYS: u32 = 36_500;

impl RepositoryConfig {
    /// Validate and compile this section.
    pub fn compile(&self) -> Result<RepositorySettings, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repositories.name".into(),
                detail: "repository name must not be empty".into(),
            });
        }
        if self.remote_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("repositories[{}].remote_url", self.name),
                detail: "remote URL must not be empty".into(),
            });
        }
        if self.default_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("repositories[{}].default_branch", self.name),
                detail: "default branch must not be empty".into(),
            });
        }
        if self.branches.max_idle_days > MAX_IDLE_DAYS {
            return Err(ConfigError::InvalidValue {
                field: format!("repositories[{}].branches.max_idle_days", self.name),
                detail: format!("must be at most {} (0 disables the limit)", MAX_IDLE_DAYS),
            });
        }
        if self.conflicts.maximum_branches_to_check == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: format!("repositories[{}].conflicts.maximum_branches_to_check", self.name),
                detail: "must be at least 1 (omit for no limit)".into(),
            });
        }

        let branches = BranchRules {
            ignore: PatternSet::compile("branches.ignore_patterns", &self.branches.ignore_patterns)?,
            only: PatternSet::compile("branches.only_patterns", &self.branches.only_patterns)?,
            max_idle_days: self.branches.max_idle_days,
        };
        let conflicts = ConflictSettings {
            ignore_files: PatternSet::compile(
                "conflicts.ignore_file_patterns",
                &self.conflicts.ignore_file_patterns,
            )?,
            maximum_branches_to_check: self.conflicts.maximum_branches_to_check,
            inherited_ancestor_branch: self.conflicts.inherited_ancestor_branch.clone(),
        };
        let auto_merge = self
            .auto_merge
            .as_ref()
            .map(|am| am.compile(&self.name))
            .transpose()?;

        Ok(RepositorySettings {
            name: self.name.clone(),
            remote_url: self.remote_url.clone(),
            default_branch: self.default_branch.clone(),
            branches,
            conflicts,
            auto_merge,
        })
    }
}

impl AutoMergeConfig {
    fn compile(&self, repository: &str) -> Result<AutoMergeSettings, ConfigError> {
        if self.source_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("repositories[{}].auto_merge.source_branch", repository),
                detail: "source branch must not be empty".into(),
            });
        }
        let source_tag = self
            .source_tag_pattern
            .as_ref()
            .map(|p| PatternSet::compile("auto_merge.source_tag_pattern", std::slice::from_ref(p)))
            .transpose()?;
        Ok(AutoMergeSettings {
            source_branch: self.source_branch.clone(),
            source_tag,
            source_tag_pattern: self.source_tag_pattern.clone(),
            targets: BranchRules {
                ignore: PatternSet::compile(
                    "auto_merge.ignore_target_patterns",
                    &self.ignore_target_patterns,
                )?,
                only: PatternSet::compile(
                    "auto_merge.only_target_patterns",
                    &self.only_target_patterns,
                )?,
                max_idle_days: 0,
            },
            dry_run: self.dry_run,
        })
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(repositories = config.repositories.len(), "configuration parsed");
        Ok(config)
    }

    /// Validate all sections, returning the compiled repository settings in
    /// file order.
    pub fn validate(&self) -> Result<Vec<RepositorySettings>, ConfigError> {
        if self.engine.git_binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "engine.git_binary".into(),
                detail: "git binary must not be empty".into(),
            });
        }
        if self.repositories.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repositories".into(),
                detail: "at least one repository must be configured".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        let mut working_copies = std::collections::HashMap::new();
        let mut compiled = Vec::with_capacity(self.repositories.len());
        for repo in &self.repositories {
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "repositories.name".into(),
                    detail: format!("repository '{}' is configured twice", repo.name),
                });
            }
            let path = self.engine.working_copy_path(&repo.name);
            if let Some(other) = working_copies.insert(path, repo.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "repositories.name".into(),
                    detail: format!(
                        "repositories '{}' and '{}' would share a working copy",
                        other, repo.name
                    ),
                });
            }
            compiled.push(repo.compile()?);
        }
        Ok(compiled)
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(
        path: P,
    ) -> Result<(Self, Vec<RepositorySettings>), ConfigError> {
        let config = Self::load_from_file(path)?;
        let settings = config.validate()?;
        Ok((config, settings))
    }
}
