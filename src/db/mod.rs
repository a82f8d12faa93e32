//! Per-user storage layer for torbox-automation
//!
//! Each registered user owns one SQLite database holding their rules, item
//! shadow, derived telemetry, speed history, tags, archive, and rule
//! execution log. The poll cycle is the single writer for a given user's
//! database; the scheduler guarantees that via the in-progress flag.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`shadow`] — Last-observed totals and state per item
//! - [`telemetry`] — Derived stall/activity timestamps
//! - [`speed`] — Append-only speed samples and retention
//! - [`tags`] — Tags and item/tag assignments
//! - [`archive`] — Archived downloads
//! - [`rules`] — Automation rules and the execution log

use crate::clock;
use crate::types::{ItemId, RuleId, TagId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod archive;
mod migrations;
mod rules;
mod shadow;
mod speed;
mod tags;
mod telemetry;

/// Shadow record: the last observed cumulative totals and state of one item
#[derive(Debug, Clone, FromRow)]
pub struct ShadowRow {
    /// Item this row shadows
    pub torrent_id: ItemId,
    /// Cumulative bytes downloaded at the last observation
    pub last_total_downloaded: i64,
    /// Cumulative bytes uploaded at the last observation
    pub last_total_uploaded: i64,
    /// Classified status label at the last observation
    pub last_state: String,
    /// When this row was last written (ISO-8601 UTC)
    pub updated_at: String,
}

impl ShadowRow {
    /// Parsed `updated_at`, if well-formed
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        clock::parse_timestamp(&self.updated_at)
    }
}

/// Derived telemetry for one item: timestamps the API cannot report directly
#[derive(Debug, Clone, Default, FromRow)]
pub struct TelemetryRow {
    /// Item this row belongs to
    pub torrent_id: ItemId,
    /// When the download side was first observed stalled, if stalled
    pub stalled_since: Option<String>,
    /// When the upload side was first observed stalled, if stalled
    pub upload_stalled_since: Option<String>,
    /// Last time cumulative download bytes advanced
    pub last_download_activity_at: Option<String>,
    /// Last time cumulative upload bytes advanced
    pub last_upload_activity_at: Option<String>,
}

impl TelemetryRow {
    /// Parsed `stalled_since`
    pub fn stalled_since(&self) -> Option<DateTime<Utc>> {
        clock::parse_timestamp_opt(self.stalled_since.as_deref())
    }

    /// Parsed `upload_stalled_since`
    pub fn upload_stalled_since(&self) -> Option<DateTime<Utc>> {
        clock::parse_timestamp_opt(self.upload_stalled_since.as_deref())
    }

    /// Parsed `last_download_activity_at`
    pub fn last_download_activity_at(&self) -> Option<DateTime<Utc>> {
        clock::parse_timestamp_opt(self.last_download_activity_at.as_deref())
    }

    /// Parsed `last_upload_activity_at`
    pub fn last_upload_activity_at(&self) -> Option<DateTime<Utc>> {
        clock::parse_timestamp_opt(self.last_upload_activity_at.as_deref())
    }
}

/// One appended speed sample: cumulative byte counters at a point in time
#[derive(Debug, Clone, FromRow)]
pub struct SpeedSampleRow {
    /// Unique database ID
    pub id: i64,
    /// Item the sample belongs to
    pub torrent_id: ItemId,
    /// Sample time (ISO-8601 UTC)
    pub timestamp: String,
    /// Cumulative bytes downloaded at sample time
    pub total_downloaded: i64,
    /// Cumulative bytes uploaded at sample time
    pub total_uploaded: i64,
}

impl SpeedSampleRow {
    /// Parsed sample time, if well-formed
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        clock::parse_timestamp(&self.timestamp)
    }
}

/// Tag record
#[derive(Debug, Clone, FromRow)]
pub struct TagRow {
    /// Unique database ID
    pub id: TagId,
    /// Tag name (unique, case-insensitive)
    pub name: String,
}

/// Archived download record
#[derive(Debug, Clone, FromRow)]
pub struct ArchivedRow {
    /// Unique database ID
    pub id: i64,
    /// Item that was archived (unique)
    pub torrent_id: ItemId,
    /// Info hash, if known
    pub hash: Option<String>,
    /// Tracker host, if known
    pub tracker: Option<String>,
    /// Item name at archive time
    pub name: String,
    /// When the item was archived (ISO-8601 UTC)
    pub archived_at: String,
}

/// Automation rule record, raw from storage.
///
/// The JSON columns are parsed by the rules module
/// ([`crate::rules::Rule::from_row`]); they are stored verbatim and never
/// rewritten, so legacy payload shapes round-trip untouched.
#[derive(Debug, Clone, FromRow)]
pub struct RuleRow {
    /// Unique database ID
    pub id: RuleId,
    /// Human-readable rule name
    pub name: String,
    /// Whether the rule is evaluated (0 = disabled, 1 = enabled)
    pub enabled: i64,
    /// Trigger JSON (`{"type": "interval", "value": minutes}`), if any
    pub trigger_config: Option<String>,
    /// Conditions JSON: grouped form or legacy flat form
    pub conditions: Option<String>,
    /// Action JSON (`{"type": ..., "tagIds": [...]}`)
    pub action_config: Option<String>,
    /// Free-form metadata JSON
    pub metadata: Option<String>,
    /// When the rule's action last ran (ISO-8601 UTC)
    pub last_executed_at: Option<String>,
    /// When the rule was last evaluated (ISO-8601 UTC)
    pub last_evaluated_at: Option<String>,
    /// How many times the rule's action has run
    pub execution_count: i64,
    /// When the rule was created (ISO-8601 UTC)
    pub created_at: String,
    /// When the rule was last modified (ISO-8601 UTC)
    pub updated_at: String,
}

impl RuleRow {
    /// Parsed `last_evaluated_at`, if well-formed
    pub fn last_evaluated_at(&self) -> Option<DateTime<Utc>> {
        clock::parse_timestamp_opt(self.last_evaluated_at.as_deref())
    }
}

/// New automation rule to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewRule {
    /// Human-readable rule name
    pub name: String,
    /// Whether the rule starts enabled
    pub enabled: bool,
    /// Trigger JSON, if any
    pub trigger_config: Option<serde_json::Value>,
    /// Conditions JSON (grouped or legacy flat form)
    pub conditions: serde_json::Value,
    /// Action JSON
    pub action_config: serde_json::Value,
    /// Free-form metadata JSON
    pub metadata: Option<serde_json::Value>,
}

/// Rule execution log record
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionLogRow {
    /// Unique database ID
    pub id: i64,
    /// Rule that executed
    pub rule_id: RuleId,
    /// Rule name at execution time
    pub rule_name: String,
    /// Action type that ran (e.g. "add_tag")
    pub execution_type: String,
    /// Number of items the action processed
    pub items_processed: i64,
    /// Whether every item succeeded (0 = no, 1 = yes)
    pub success: i64,
    /// Error message when `success` is 0
    pub error_message: Option<String>,
    /// When the execution happened (ISO-8601 UTC)
    pub executed_at: String,
}

/// New rule execution log entry
#[derive(Debug, Clone)]
pub struct NewExecutionLog<'a> {
    /// Rule that executed
    pub rule_id: RuleId,
    /// Rule name at execution time
    pub rule_name: &'a str,
    /// Action type that ran
    pub execution_type: &'a str,
    /// Number of items the action processed
    pub items_processed: i64,
    /// Whether every item succeeded
    pub success: bool,
    /// Error message on failure
    pub error_message: Option<&'a str>,
}

/// Per-user database handle
pub struct Database {
    pool: SqlitePool,
}

/// Placeholder list for a dynamic `IN (...)` clause with `n` bindings
pub(crate) fn in_placeholders(n: usize) -> String {
    let mut placeholders = "?,".repeat(n);
    placeholders.pop();
    placeholders
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
