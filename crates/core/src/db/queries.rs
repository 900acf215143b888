//! Typed query helpers for every table in the branchwatch database.
//!
//! Natural-key upserts are exposed as `find_or_create_*` operations that
//! report whether the row already existed, so callers can decide whether
//! timestamps need touching.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{decode_ts, encode_ts, Database};
use crate::errors::DatabaseError;
use crate::models::{
    normalize_files, Branch, BranchPair, Conflict, ConflictChange, Merge, Repository,
    SuppressionRule, SuppressionTarget, User,
};

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Time window applied to `status_last_changed` / `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Any,
    ChangedAfter(DateTime<Utc>),
    ChangedBefore(DateTime<Utc>),
}

impl TimeWindow {
    fn bounds(&self) -> (Option<String>, Option<String>) {
        match self {
            Self::Any => (None, None),
            Self::ChangedAfter(ts) => (Some(encode_ts(*ts)), None),
            Self::ChangedBefore(ts) => (None, Some(encode_ts(*ts))),
        }
    }
}

/// Conflict query used by notification logic.
#[derive(Debug, Clone)]
pub struct ConflictFilter {
    pub repository_id: i64,
    pub resolved: bool,
    pub window: TimeWindow,
    /// Apply this user's active suppression rules.
    pub suppressed_for_user: Option<i64>,
    /// Drop conflicts where either side is one of these branches.
    pub excluded_branch_ids: HashSet<i64>,
}

impl ConflictFilter {
    pub fn new(repository_id: i64, resolved: bool) -> Self {
        Self {
            repository_id,
            resolved,
            window: TimeWindow::Any,
            suppressed_for_user: None,
            excluded_branch_ids: HashSet::new(),
        }
    }
}

/// Merge query used by notification logic.
#[derive(Debug, Clone, Default)]
pub struct MergeFilter {
    pub repository_id: i64,
    pub successful: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    /// Only merges whose target branch is authored by this user.
    pub target_owner_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    decode_ts(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        decode_ts(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn files_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_files(files: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(files).map_err(|e| DatabaseError::Validation {
        entity: "conflict".into(),
        detail: e.to_string(),
    })
}

const BRANCH_COLUMNS: &str =
    "id, repository_id, name, author_id, git_updated_at, git_tested_at, created_at, updated_at";

fn map_branch(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        name: row.get(2)?,
        author_id: row.get(3)?,
        git_updated_at: ts_col(row, 4)?,
        git_tested_at: opt_ts_col(row, 5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}

const CONFLICT_COLUMNS: &str = "c.id, c.branch_a_id, c.branch_b_id, c.resolved, \
     c.status_last_changed, c.conflicting_files, c.created_at, c.updated_at";

fn map_conflict(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    Ok(Conflict {
        id: row.get(0)?,
        branch_a_id: row.get(1)?,
        branch_b_id: row.get(2)?,
        resolved: row.get(3)?,
        status_last_changed: ts_col(row, 4)?,
        conflicting_files: files_col(row, 5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}

fn map_merge(row: &Row<'_>) -> rusqlite::Result<Merge> {
    Ok(Merge {
        id: row.get(0)?,
        source_branch_id: row.get(1)?,
        target_branch_id: row.get(2)?,
        successful: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}

// ---------------------------------------------------------------------------
// Connection-level helpers (composable inside transactions)
// ---------------------------------------------------------------------------

fn load_conflict(conn: &Connection, pair: BranchPair) -> Result<Option<Conflict>, DatabaseError> {
    let sql = format!(
        "SELECT {CONFLICT_COLUMNS} FROM conflicts c WHERE c.branch_a_id = ?1 AND c.branch_b_id = ?2"
    );
    Ok(conn
        .query_row(&sql, params![pair.low(), pair.high()], map_conflict)
        .optional()?)
}

/// Look up the conflict for `pair`, creating it unresolved with `files` if
/// it does not exist yet. Returns the row and whether it already existed.
fn find_or_create_conflict(
    conn: &Connection,
    pair: BranchPair,
    files: &[String],
    now: DateTime<Utc>,
) -> Result<(Conflict, bool), DatabaseError> {
    if let Some(existing) = load_conflict(conn, pair)? {
        return Ok((existing, true));
    }
    let ts = encode_ts(now);
    conn.execute(
        "INSERT INTO conflicts
             (branch_a_id, branch_b_id, resolved, status_last_changed, conflicting_files, created_at, updated_at)
         VALUES (?1, ?2, 0, ?3, ?4, ?3, ?3)",
        params![pair.low(), pair.high(), ts, encode_files(files)?],
    )?;
    let created = load_conflict(conn, pair)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "conflict".into(),
        id: format!("{}-{}", pair.low(), pair.high()),
    })?;
    Ok((created, false))
}

fn branch_repository(conn: &Connection, branch_id: i64) -> Result<i64, DatabaseError> {
    conn.query_row(
        "SELECT repository_id FROM branches WHERE id = ?1",
        params![branch_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "branch".into(),
        id: branch_id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- repositories -------------------------------------------------------

    /// Find a repository by name, creating it if needed.
    pub fn find_or_create_repository(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(Repository, bool), DatabaseError> {
        self.transaction(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, name FROM repositories WHERE name = ?1",
                    params![name],
                    |row| Ok(Repository { id: row.get(0)?, name: row.get(1)? }),
                )
                .optional()?;
            if let Some(repo) = existing {
                return Ok((repo, true));
            }
            conn.execute(
                "INSERT INTO repositories (name, created_at) VALUES (?1, ?2)",
                params![name, encode_ts(now)],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, name, "created repository");
            Ok((Repository { id, name: name.to_string() }, false))
        })
    }

    /// Look up a repository by name.
    pub fn get_repository(&self, name: &str) -> Result<Option<Repository>, DatabaseError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, name FROM repositories WHERE name = ?1",
                params![name],
                |row| Ok(Repository { id: row.get(0)?, name: row.get(1)? }),
            )
            .optional()?)
    }

    // -- users --------------------------------------------------------------

    /// Find a user by email, creating it if needed. An existing user's
    /// display name is refreshed when it changed.
    pub fn find_or_create_user(
        &self,
        name: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(User, bool), DatabaseError> {
        self.transaction(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, name, email FROM users WHERE email = ?1",
                    params![email],
                    |row| Ok(User { id: row.get(0)?, name: row.get(1)?, email: row.get(2)? }),
                )
                .optional()?;
            match existing {
                Some(mut user) => {
                    if user.name != name {
                        conn.execute(
                            "UPDATE users SET name = ?1, updated_at = ?2 WHERE id = ?3",
                            params![name, encode_ts(now), user.id],
                        )?;
                        user.name = name.to_string();
                    }
                    Ok((user, true))
                }
                None => {
                    let ts = encode_ts(now);
                    conn.execute(
                        "INSERT INTO users (name, email, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                        params![name, email, ts],
                    )?;
                    let id = conn.last_insert_rowid();
                    Ok((User { id, name: name.to_string(), email: email.to_string() }, false))
                }
            }
        })
    }

    /// Look up a user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, name, email FROM users WHERE email = ?1",
                params![email],
                |row| Ok(User { id: row.get(0)?, name: row.get(1)?, email: row.get(2)? }),
            )
            .optional()?)
    }

    // -- branches -----------------------------------------------------------

    /// Insert or refresh a branch by `(repository, name)`. `seen_at` is
    /// written to `updated_at` even when nothing else changed, marking the
    /// branch as present in the current listing.
    pub fn upsert_branch(
        &self,
        repository_id: i64,
        name: &str,
        author_id: i64,
        git_updated_at: DateTime<Utc>,
        seen_at: DateTime<Utc>,
    ) -> Result<(Branch, bool), DatabaseError> {
        self.transaction(|conn| {
            let seen = encode_ts(seen_at);
            let changed = conn.execute(
                "UPDATE branches SET author_id = ?1, git_updated_at = ?2, updated_at = ?3
                 WHERE repository_id = ?4 AND name = ?5",
                params![author_id, encode_ts(git_updated_at), seen, repository_id, name],
            )?;
            let existed = changed > 0;
            if !existed {
                conn.execute(
                    "INSERT INTO branches
                         (repository_id, name, author_id, git_updated_at, git_tested_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)",
                    params![repository_id, name, author_id, encode_ts(git_updated_at), seen],
                )?;
                debug!(repository_id, name, "created branch");
            }
            let sql = format!(
                "SELECT {BRANCH_COLUMNS} FROM branches WHERE repository_id = ?1 AND name = ?2"
            );
            let branch = conn.query_row(&sql, params![repository_id, name], map_branch)?;
            Ok((branch, existed))
        })
    }

    /// Delete every branch of `repository_id` not seen since `since`.
    /// Conflicts, merges and suppressions referencing them cascade.
    pub fn delete_branches_not_seen_since(
        &self,
        repository_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, DatabaseError> {
        self.transaction(|conn| {
            let names = {
                let mut stmt = conn.prepare(
                    "SELECT name FROM branches WHERE repository_id = ?1 AND updated_at < ?2 ORDER BY name",
                )?;
                let rows = stmt.query_map(params![repository_id, encode_ts(since)], |row| row.get(0))?;
                rows.collect::<Result<Vec<String>, _>>()?
            };
            conn.execute(
                "DELETE FROM branches WHERE repository_id = ?1 AND updated_at < ?2",
                params![repository_id, encode_ts(since)],
            )?;
            Ok(names)
        })
    }

    /// All branches of a repository, ordered by name.
    pub fn list_branches(&self, repository_id: i64) -> Result<Vec<Branch>, DatabaseError> {
        let conn = self.conn();
        let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE repository_id = ?1 ORDER BY name");
        let mut stmt = conn.prepare(&sql)?;
        let branches = stmt
            .query_map(params![repository_id], map_branch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(branches)
    }

    /// Look up a branch by id.
    pub fn get_branch(&self, id: i64) -> Result<Option<Branch>, DatabaseError> {
        let conn = self.conn();
        let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], map_branch).optional()?)
    }

    /// Look up a branch by repository and name.
    pub fn get_branch_by_name(
        &self,
        repository_id: i64,
        name: &str,
    ) -> Result<Option<Branch>, DatabaseError> {
        let conn = self.conn();
        let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE repository_id = ?1 AND name = ?2");
        Ok(conn
            .query_row(&sql, params![repository_id, name], map_branch)
            .optional()?)
    }

    /// Stamp `git_tested_at` on the given branches.
    pub fn mark_branches_tested(
        &self,
        branch_ids: &[i64],
        tested_at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        self.transaction(|conn| {
            let ts = encode_ts(tested_at);
            let mut stmt = conn.prepare("UPDATE branches SET git_tested_at = ?1 WHERE id = ?2")?;
            let mut total = 0;
            for id in branch_ids {
                total += stmt.execute(params![ts, id])?;
            }
            Ok(total)
        })
    }

    // -- conflicts ----------------------------------------------------------

    /// Record that `pair` conflicts on `files`.
    ///
    /// An unresolved conflict with the same file set is left untouched, so
    /// `status_last_changed` only moves when the status or the files do.
    pub fn record_conflict(
        &self,
        pair: BranchPair,
        files: &[String],
        now: DateTime<Utc>,
    ) -> Result<(Conflict, ConflictChange), DatabaseError> {
        let files = normalize_files(files.iter().cloned());
        self.transaction(|conn| {
            let (existing, existed) = find_or_create_conflict(conn, pair, &files, now)?;
            if !existed {
                return Ok((existing, ConflictChange::Created));
            }
            let change = if existing.resolved {
                ConflictChange::Reopened
            } else if existing.conflicting_files != files {
                ConflictChange::FilesChanged
            } else {
                return Ok((existing, ConflictChange::Unchanged));
            };
            let ts = encode_ts(now);
            conn.execute(
                "UPDATE conflicts SET resolved = 0, conflicting_files = ?1,
                     status_last_changed = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![encode_files(&files)?, ts, existing.id],
            )?;
            let updated = load_conflict(conn, pair)?.ok_or_else(|| DatabaseError::NotFound {
                entity: "conflict".into(),
                id: existing.id.to_string(),
            })?;
            Ok((updated, change))
        })
    }

    /// Mark the conflict for `pair` resolved. Only an unresolved conflict is
    /// touched; returns whether anything changed.
    pub fn clear_conflict(&self, pair: BranchPair, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let ts = encode_ts(now);
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE conflicts SET resolved = 1, conflicting_files = '[]',
                 status_last_changed = ?1, updated_at = ?1
             WHERE branch_a_id = ?2 AND branch_b_id = ?3 AND resolved = 0",
            params![ts, pair.low(), pair.high()],
        )?;
        Ok(changed > 0)
    }

    /// Look up the conflict for a pair.
    pub fn get_conflict(&self, pair: BranchPair) -> Result<Option<Conflict>, DatabaseError> {
        let conn = self.conn();
        load_conflict(&conn, pair)
    }

    /// Look up a conflict by id.
    pub fn get_conflict_by_id(&self, id: i64) -> Result<Option<Conflict>, DatabaseError> {
        let conn = self.conn();
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM conflicts c WHERE c.id = ?1");
        Ok(conn.query_row(&sql, params![id], map_conflict).optional()?)
    }

    /// Conflicts matching `filter`, oldest status change first. `now`
    /// decides which suppression rules are still active.
    pub fn list_conflicts(
        &self,
        filter: &ConflictFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Conflict>, DatabaseError> {
        let (after, before) = filter.window.bounds();
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS}
             FROM conflicts c
             JOIN branches ba ON ba.id = c.branch_a_id
             WHERE ba.repository_id = ?1
               AND c.resolved = ?2
               AND (?3 IS NULL OR c.status_last_changed > ?3)
               AND (?4 IS NULL OR c.status_last_changed < ?4)
               AND (?5 IS NULL OR (
                    NOT EXISTS (
                        SELECT 1 FROM conflict_suppressions s
                        WHERE s.user_id = ?5 AND s.conflict_id = c.id
                          AND (s.suppress_until IS NULL OR s.suppress_until > ?6))
                    AND NOT EXISTS (
                        SELECT 1 FROM branch_suppressions s
                        WHERE s.user_id = ?5 AND s.branch_id IN (c.branch_a_id, c.branch_b_id)
                          AND (s.suppress_until IS NULL OR s.suppress_until > ?6))))
             ORDER BY c.status_last_changed, c.id"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let conflicts = stmt
            .query_map(
                params![
                    filter.repository_id,
                    filter.resolved,
                    after,
                    before,
                    filter.suppressed_for_user,
                    encode_ts(now)
                ],
                map_conflict,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conflicts
            .into_iter()
            .filter(|c| {
                !filter.excluded_branch_ids.contains(&c.branch_a_id)
                    && !filter.excluded_branch_ids.contains(&c.branch_b_id)
            })
            .collect())
    }

    /// Count conflicts of a repository by resolution state.
    pub fn count_conflicts(&self, repository_id: i64, resolved: bool) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conflicts c JOIN branches ba ON ba.id = c.branch_a_id
             WHERE ba.repository_id = ?1 AND c.resolved = ?2",
            params![repository_id, resolved],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- merges -------------------------------------------------------------

    /// Remove every merge whose target belongs to `repository_id`.
    pub fn delete_merges_for_repository(&self, repository_id: i64) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let deleted = conn.execute(
            "DELETE FROM merges WHERE target_branch_id IN
                 (SELECT id FROM branches WHERE repository_id = ?1)",
            params![repository_id],
        )?;
        debug!(repository_id, deleted, "purged merges");
        Ok(deleted)
    }

    /// Record a merge outcome. Source and target must differ and belong to
    /// the same repository.
    pub fn insert_merge(
        &self,
        source_branch_id: i64,
        target_branch_id: i64,
        successful: bool,
        now: DateTime<Utc>,
    ) -> Result<Merge, DatabaseError> {
        if source_branch_id == target_branch_id {
            return Err(DatabaseError::Validation {
                entity: "merge".into(),
                detail: format!("branch {} cannot be merged into itself", source_branch_id),
            });
        }
        self.transaction(|conn| {
            let source_repo = branch_repository(conn, source_branch_id)?;
            let target_repo = branch_repository(conn, target_branch_id)?;
            if source_repo != target_repo {
                return Err(DatabaseError::Validation {
                    entity: "merge".into(),
                    detail: format!(
                        "source branch {} and target branch {} belong to different repositories",
                        source_branch_id, target_branch_id
                    ),
                });
            }
            conn.execute(
                "INSERT INTO merges (source_branch_id, target_branch_id, successful, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (source_branch_id, target_branch_id)
                 DO UPDATE SET successful = excluded.successful, created_at = excluded.created_at",
                params![source_branch_id, target_branch_id, successful, encode_ts(now)],
            )?;
            let merge = conn.query_row(
                "SELECT id, source_branch_id, target_branch_id, successful, created_at
                 FROM merges WHERE source_branch_id = ?1 AND target_branch_id = ?2",
                params![source_branch_id, target_branch_id],
                map_merge,
            )?;
            Ok(merge)
        })
    }

    /// Merges matching `filter`, oldest first.
    pub fn list_merges(&self, filter: &MergeFilter) -> Result<Vec<Merge>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.source_branch_id, m.target_branch_id, m.successful, m.created_at
             FROM merges m
             JOIN branches t ON t.id = m.target_branch_id
             WHERE t.repository_id = ?1
               AND (?2 IS NULL OR m.successful = ?2)
               AND (?3 IS NULL OR m.created_at > ?3)
               AND (?4 IS NULL OR t.author_id = ?4)
             ORDER BY m.created_at, m.id",
        )?;
        let merges = stmt
            .query_map(
                params![
                    filter.repository_id,
                    filter.successful,
                    filter.created_after.map(encode_ts),
                    filter.target_owner_id
                ],
                map_merge,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(merges)
    }

    // -- suppressions -------------------------------------------------------

    /// Create or overwrite the rule for `(user, target)`.
    pub fn upsert_suppression(
        &self,
        user_id: i64,
        target: SuppressionTarget,
        suppress_until: Option<DateTime<Utc>>,
    ) -> Result<SuppressionRule, DatabaseError> {
        let until = suppress_until.map(encode_ts);
        let conn = self.conn();
        let id: i64 = match target {
            SuppressionTarget::Branch(branch_id) => conn.query_row(
                "INSERT INTO branch_suppressions (user_id, branch_id, suppress_until)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, branch_id) DO UPDATE SET suppress_until = excluded.suppress_until
                 RETURNING id",
                params![user_id, branch_id, until],
                |row| row.get(0),
            )?,
            SuppressionTarget::Conflict(conflict_id) => conn.query_row(
                "INSERT INTO conflict_suppressions (user_id, conflict_id, suppress_until)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, conflict_id) DO UPDATE SET suppress_until = excluded.suppress_until
                 RETURNING id",
                params![user_id, conflict_id, until],
                |row| row.get(0),
            )?,
        };
        debug!(user_id, %target, "upserted suppression rule");
        Ok(SuppressionRule {
            id,
            user_id,
            target,
            suppress_until,
        })
    }

    /// Look up the rule for `(user, target)`, active or not.
    pub fn get_suppression(
        &self,
        user_id: i64,
        target: SuppressionTarget,
    ) -> Result<Option<SuppressionRule>, DatabaseError> {
        let (sql, target_id) = match target {
            SuppressionTarget::Branch(id) => (
                "SELECT id, suppress_until FROM branch_suppressions WHERE user_id = ?1 AND branch_id = ?2",
                id,
            ),
            SuppressionTarget::Conflict(id) => (
                "SELECT id, suppress_until FROM conflict_suppressions WHERE user_id = ?1 AND conflict_id = ?2",
                id,
            ),
        };
        let conn = self.conn();
        Ok(conn
            .query_row(sql, params![user_id, target_id], |row| {
                Ok(SuppressionRule {
                    id: row.get(0)?,
                    user_id,
                    target,
                    suppress_until: opt_ts_col(row, 1)?,
                })
            })
            .optional()?)
    }

    /// Delete the rule for `(user, target)`. Returns whether one existed.
    pub fn delete_suppression(
        &self,
        user_id: i64,
        target: SuppressionTarget,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let deleted = match target {
            SuppressionTarget::Branch(id) => conn.execute(
                "DELETE FROM branch_suppressions WHERE user_id = ?1 AND branch_id = ?2",
                params![user_id, id],
            )?,
            SuppressionTarget::Conflict(id) => conn.execute(
                "DELETE FROM conflict_suppressions WHERE user_id = ?1 AND conflict_id = ?2",
                params![user_id, id],
            )?,
        };
        Ok(deleted > 0)
    }

    /// Every rule owned by `user_id`, branch rules first.
    pub fn list_suppressions(&self, user_id: i64) -> Result<Vec<SuppressionRule>, DatabaseError> {
        let conn = self.conn();
        let mut rules = Vec::new();

        let mut stmt = conn.prepare(
            "SELECT id, branch_id, suppress_until FROM branch_suppressions WHERE user_id = ?1 ORDER BY id",
        )?;
        let branch_rules = stmt.query_map(params![user_id], |row| {
            Ok(SuppressionRule {
                id: row.get(0)?,
                user_id,
                target: SuppressionTarget::Branch(row.get(1)?),
                suppress_until: opt_ts_col(row, 2)?,
            })
        })?;
        for rule in branch_rules {
            rules.push(rule?);
        }

        let mut stmt = conn.prepare(
            "SELECT id, conflict_id, suppress_until FROM conflict_suppressions WHERE user_id = ?1 ORDER BY id",
        )?;
        let conflict_rules = stmt.query_map(params![user_id], |row| {
            Ok(SuppressionRule {
                id: row.get(0)?,
                user_id,
                target: SuppressionTarget::Conflict(row.get(1)?),
                suppress_until: opt_ts_col(row, 2)?,
            })
        })?;
        for rule in conflict_rules {
            rules.push(rule?);
        }

        Ok(rules)
    }

    // -- watermarks ---------------------------------------------------------

    /// Read a timestamp watermark.
    pub fn get_watermark(&self, key: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM watermarks WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| decode_ts(&s)).transpose()
    }

    /// Set (upsert) a timestamp watermark.
    pub fn set_watermark(&self, key: &str, value: DateTime<Utc>) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO watermarks (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, encode_ts(value), encode_ts(Utc::now())],
        )?;
        debug!(key, "set watermark");
        Ok(())
    }
}
