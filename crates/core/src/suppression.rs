//! Per-user notification mutes for branches and conflicts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::db::Database;
use crate::errors::DatabaseError;
use crate::models::{Conflict, SuppressionRule, SuppressionTarget};

/// Creates, lifts and evaluates suppression rules.
pub struct SuppressionLedger {
    db: Arc<Database>,
}

impl SuppressionLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Mute `target` for `user_id` until `until` (`None` = indefinitely).
    /// An existing rule for the same target has its expiry overwritten.
    pub fn suppress(
        &self,
        user_id: i64,
        target: SuppressionTarget,
        until: Option<DateTime<Utc>>,
    ) -> Result<SuppressionRule, DatabaseError> {
        let rule = self.db.upsert_suppression(user_id, target, until)?;
        info!(user_id, %target, until = ?until, "suppression rule saved");
        Ok(rule)
    }

    /// Remove the rule for `target`. Returns whether one existed.
    pub fn lift(&self, user_id: i64, target: SuppressionTarget) -> Result<bool, DatabaseError> {
        let removed = self.db.delete_suppression(user_id, target)?;
        debug!(user_id, %target, removed, "suppression rule lifted");
        Ok(removed)
    }

    /// `true` if an active rule mutes `target` for `user_id`.
    pub fn is_suppressed(
        &self,
        user_id: i64,
        target: SuppressionTarget,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .db
            .get_suppression(user_id, target)?
            .is_some_and(|rule| rule.is_active(now)))
    }

    /// A conflict is muted by a rule on the conflict itself or on either
    /// of its branches.
    pub fn is_conflict_suppressed(
        &self,
        user_id: i64,
        conflict: &Conflict,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        for target in [
            SuppressionTarget::Conflict(conflict.id),
            SuppressionTarget::Branch(conflict.branch_a_id),
            SuppressionTarget::Branch(conflict.branch_b_id),
        ] {
            if self.is_suppressed(user_id, target, now)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rules of `user_id` that are still in force.
    pub fn active_rules(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SuppressionRule>, DatabaseError> {
        Ok(self
            .db
            .list_suppressions(user_id)?
            .into_iter()
            .filter(|rule| rule.is_active(now))
            .collect())
    }
}
