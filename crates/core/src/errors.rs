//! Error types for the branchwatch core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`EngineError`] wraps the git and database errors a run can hit.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from driving the `git` executable.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a status that was not interpreted as a
    /// conflict or no-op.
    #[error("git command `{command}` failed (exit {exit_code}): {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Output of a structured git command could not be parsed.
    #[error("failed to parse git output line '{line}': {detail}")]
    ParseError { line: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Fatal errors that abort the current repository's run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The live branch listing reported a repository other than the one
    /// this run is configured for.
    #[error("repository mismatch: configured '{expected}', listing reported '{found}'")]
    RepositoryMismatch { expected: String, found: String },

    /// More than one branch matched the configured auto-merge source.
    #[error("source branch '{name}' is ambiguous ({matches} matches)")]
    AmbiguousSourceBranch { name: String, matches: usize },

    /// No tag matched the configured source tag pattern.
    #[error("no tag matches pattern '{pattern}'")]
    NoMatchingTag { pattern: String },

    /// Source and target branches of a merge belong to different repositories.
    #[error("cannot merge '{source_branch}' into '{target_branch}': branches belong to different repositories")]
    CrossRepositoryMerge {
        source_branch: String,
        target_branch: String,
    },

    /// Auto-merge was requested for a repository without an
    /// `auto_merge` section.
    #[error("auto-merge is not configured for repository '{repository}'")]
    AutoMergeNotConfigured { repository: String },

    /// Another run already holds this repository's working copy.
    #[error("a run is already in progress for repository '{repository}'")]
    AlreadyRunning { repository: String },

    /// A local merge succeeded but the push reported nothing to update.
    #[error("push of '{target_branch}' after merging '{source_branch}' had no effect; remote diverged")]
    PushDivergence {
        source_branch: String,
        target_branch: String,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl EngineError {
    /// `true` for errors caused by settings or live data disagreeing with
    /// the configuration, as opposed to tool or storage failures.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::RepositoryMismatch { .. }
                | Self::AmbiguousSourceBranch { .. }
                | Self::NoMatchingTag { .. }
                | Self::CrossRepositoryMerge { .. }
                | Self::AutoMergeNotConfigured { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// A regular expression in a pattern list does not compile.
    #[error("invalid pattern '{pattern}' in '{field}': {detail}")]
    InvalidPattern {
        field: String,
        pattern: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An entity violated one of its invariants.
    #[error("invalid {entity}: {detail}")]
    Validation { entity: String, detail: String },

    /// A stored value could not be decoded.
    #[error("corrupt {column} value '{value}'")]
    Corrupt { column: String, value: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
