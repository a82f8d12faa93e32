//! Automation rule storage and the rule execution log.

use crate::clock;
use crate::error::DatabaseError;
use crate::types::RuleId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{Database, ExecutionLogRow, NewExecutionLog, NewRule, RuleRow};

const RULE_COLUMNS: &str = r#"
    id, name, enabled, trigger_config, conditions, action_config, metadata,
    last_executed_at, last_evaluated_at, execution_count, created_at, updated_at
"#;

impl Database {
    /// Insert a new automation rule
    pub async fn insert_rule(&self, rule: &NewRule) -> Result<RuleId> {
        let now = clock::format_timestamp(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO automation_rules (
                name, enabled, trigger_config, conditions, action_config, metadata,
                execution_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&rule.name)
        .bind(rule.enabled as i64)
        .bind(rule.trigger_config.as_ref().map(|v| v.to_string()))
        .bind(rule.conditions.to_string())
        .bind(rule.action_config.to_string())
        .bind(rule.metadata.as_ref().map(|v| v.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert rule: {}",
                e
            )))
        })?;

        Ok(RuleId(result.last_insert_rowid()))
    }

    /// Get one rule
    pub async fn get_rule(&self, id: RuleId) -> Result<Option<RuleRow>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM automation_rules WHERE id = ?");
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get rule: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// List all rules
    pub async fn list_rules(&self) -> Result<Vec<RuleRow>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM automation_rules ORDER BY id ASC");
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list rules: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// List enabled rules only
    pub async fn list_enabled_rules(&self) -> Result<Vec<RuleRow>> {
        let sql =
            format!("SELECT {RULE_COLUMNS} FROM automation_rules WHERE enabled = 1 ORDER BY id ASC");
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list enabled rules: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// Enable or disable a rule
    pub async fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE automation_rules SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(clock::format_timestamp(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update rule enabled flag: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record that a rule was evaluated (its interval gate passed)
    pub async fn record_rule_evaluated(&self, id: RuleId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE automation_rules SET last_evaluated_at = ? WHERE id = ?")
            .bind(clock::format_timestamp(now))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to record rule evaluation: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record that a rule's action ran: bump the execution counter and the
    /// last-executed timestamp
    pub async fn record_rule_executed(&self, id: RuleId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE automation_rules
            SET last_executed_at = ?, execution_count = execution_count + 1
            WHERE id = ?
            "#,
        )
        .bind(clock::format_timestamp(now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record rule execution: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Append a rule execution log entry and return its rowid
    pub async fn insert_execution_log(
        &self,
        entry: &NewExecutionLog<'_>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO rule_execution_log (
                rule_id, rule_name, execution_type, items_processed, success,
                error_message, executed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.rule_id)
        .bind(entry.rule_name)
        .bind(entry.execution_type)
        .bind(entry.items_processed)
        .bind(entry.success as i64)
        .bind(entry.error_message)
        .bind(clock::format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert execution log entry: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Whether any execution log entry exists at or after the cutoff.
    ///
    /// Drives the next-poll mode selection: a user with recent rule
    /// executions stays on the active cadence.
    pub async fn has_execution_since(&self, cutoff: DateTime<Utc>) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rule_execution_log WHERE executed_at >= ?")
                .bind(clock::format_timestamp(cutoff))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query execution log: {}",
                        e
                    )))
                })?;

        Ok(count > 0)
    }

    /// List execution log entries for a rule, newest first
    pub async fn execution_log_for_rule(&self, id: RuleId) -> Result<Vec<ExecutionLogRow>> {
        let rows = sqlx::query_as::<_, ExecutionLogRow>(
            r#"
            SELECT id, rule_id, rule_name, execution_type, items_processed, success,
                   error_message, executed_at
            FROM rule_execution_log
            WHERE rule_id = ?
            ORDER BY executed_at DESC, id DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list execution log: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete execution log entries older than the cutoff
    pub async fn prune_execution_log(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rule_execution_log WHERE executed_at < ?")
            .bind(clock::format_timestamp(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to prune execution log: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }
}
