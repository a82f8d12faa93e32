//! Archive operations: the local record of items archived before deletion.

use crate::clock;
use crate::error::DatabaseError;
use crate::types::{Item, ItemId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{ArchivedRow, Database};

impl Database {
    /// Record an item as archived.
    ///
    /// Keyed by `torrent_id`: returns `true` when a row was inserted, `false`
    /// when the item was already archived. The dispatcher uses the return
    /// value to make archive→delete idempotent (an already-archived item is
    /// not deleted again).
    pub async fn insert_archived(&self, item: &Item, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO archived_downloads (torrent_id, hash, tracker, name, archived_at)
            VALUES (?, NULL, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.tracker)
        .bind(&item.name)
        .bind(clock::format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert archive row: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether an item is archived
    pub async fn is_archived(&self, id: &ItemId) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM archived_downloads WHERE torrent_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check archive: {}",
                        e
                    )))
                })?;

        Ok(count > 0)
    }

    /// List archived items, newest first
    pub async fn list_archived(&self) -> Result<Vec<ArchivedRow>> {
        let rows = sqlx::query_as::<_, ArchivedRow>(
            r#"
            SELECT id, torrent_id, hash, tracker, name, archived_at
            FROM archived_downloads
            ORDER BY archived_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list archive: {}",
                e
            )))
        })?;

        Ok(rows)
    }
}
