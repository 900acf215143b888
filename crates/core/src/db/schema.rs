//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.
//!
//! Deleting a branch cascades to every conflict, merge and suppression rule
//! that references it.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL UNIQUE,
            created_at  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL,
            email       TEXT    NOT NULL UNIQUE,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS branches (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            repository_id   INTEGER NOT NULL REFERENCES repositories (id) ON DELETE CASCADE,
            name            TEXT    NOT NULL,
            author_id       INTEGER NOT NULL REFERENCES users (id),
            git_updated_at  TEXT    NOT NULL,
            git_tested_at   TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            UNIQUE (repository_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_branches_updated_at ON branches (repository_id, updated_at);

        CREATE TABLE IF NOT EXISTS conflicts (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            branch_a_id         INTEGER NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
            branch_b_id         INTEGER NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
            resolved            INTEGER NOT NULL DEFAULT 0,
            status_last_changed TEXT    NOT NULL,
            conflicting_files   TEXT    NOT NULL DEFAULT '[]',
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            CHECK (branch_a_id < branch_b_id),
            UNIQUE (branch_a_id, branch_b_id)
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts (resolved, status_last_changed);

        CREATE TABLE IF NOT EXISTS merges (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            source_branch_id    INTEGER NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
            target_branch_id    INTEGER NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
            successful          INTEGER NOT NULL,
            created_at          TEXT    NOT NULL,
            CHECK (source_branch_id <> target_branch_id),
            UNIQUE (source_branch_id, target_branch_id)
        );

        CREATE TABLE IF NOT EXISTS watermarks (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        "#,
    ),
    (
        2,
        "notification suppression rules",
        r#"
        CREATE TABLE IF NOT EXISTS branch_suppressions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            branch_id       INTEGER NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
            suppress_until  TEXT,
            UNIQUE (user_id, branch_id)
        );

        CREATE TABLE IF NOT EXISTS conflict_suppressions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            conflict_id     INTEGER NOT NULL REFERENCES conflicts (id) ON DELETE CASCADE,
            suppress_until  TEXT,
            UNIQUE (user_id, conflict_id)
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
