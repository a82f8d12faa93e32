//! Telemetry table operations: derived stall/activity timestamps.

use crate::clock;
use crate::error::DatabaseError;
use crate::types::ItemId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{Database, TelemetryRow, in_placeholders};

impl Database {
    /// Get one telemetry row
    pub async fn get_telemetry(&self, id: &ItemId) -> Result<Option<TelemetryRow>> {
        let row = sqlx::query_as::<_, TelemetryRow>(
            r#"
            SELECT torrent_id, stalled_since, upload_stalled_since,
                   last_download_activity_at, last_upload_activity_at
            FROM torrent_telemetry
            WHERE torrent_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get telemetry row: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Batch-load telemetry for a set of items into a map keyed by item id
    pub async fn load_telemetry_for(
        &self,
        ids: &[ItemId],
    ) -> Result<HashMap<ItemId, TelemetryRow>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            r#"
            SELECT torrent_id, stalled_since, upload_stalled_since,
                   last_download_activity_at, last_upload_activity_at
            FROM torrent_telemetry
            WHERE torrent_id IN ({})
            "#,
            in_placeholders(ids.len())
        );

        let mut query = sqlx::query_as::<_, TelemetryRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to batch-load telemetry: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|row| (row.torrent_id.clone(), row))
            .collect())
    }

    /// Create a telemetry row for a newly observed item.
    ///
    /// Activity timestamps are seeded only when the item already shows
    /// nonzero cumulative totals; a later upsert keeps the row as-is.
    pub async fn insert_telemetry(
        &self,
        id: &ItemId,
        download_activity_at: Option<DateTime<Utc>>,
        upload_activity_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO torrent_telemetry (
                torrent_id, stalled_since, upload_stalled_since,
                last_download_activity_at, last_upload_activity_at
            ) VALUES (?, NULL, NULL, ?, ?)
            ON CONFLICT (torrent_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(download_activity_at.map(clock::format_timestamp))
        .bind(upload_activity_at.map(clock::format_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert telemetry row: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Record download progress: bump the activity timestamp and clear any
    /// stall marker
    pub async fn set_download_activity(&self, id: &ItemId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO torrent_telemetry (torrent_id, last_download_activity_at)
            VALUES (?, ?)
            ON CONFLICT (torrent_id) DO UPDATE SET
                last_download_activity_at = excluded.last_download_activity_at,
                stalled_since = NULL
            "#,
        )
        .bind(id)
        .bind(clock::format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record download activity: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Record upload progress: bump the activity timestamp and clear any
    /// stall marker
    pub async fn set_upload_activity(&self, id: &ItemId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO torrent_telemetry (torrent_id, last_upload_activity_at)
            VALUES (?, ?)
            ON CONFLICT (torrent_id) DO UPDATE SET
                last_upload_activity_at = excluded.last_upload_activity_at,
                upload_stalled_since = NULL
            "#,
        )
        .bind(id)
        .bind(clock::format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record upload activity: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark the download side stalled. Only writes when no stall is already
    /// recorded, so `stalled_since` keeps the first observation time.
    pub async fn set_download_stalled(&self, id: &ItemId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO torrent_telemetry (torrent_id, stalled_since)
            VALUES (?, ?)
            ON CONFLICT (torrent_id) DO UPDATE SET
                stalled_since = excluded.stalled_since
            WHERE torrent_telemetry.stalled_since IS NULL
            "#,
        )
        .bind(id)
        .bind(clock::format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark download stalled: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark the upload side stalled. Only writes when no stall is already
    /// recorded.
    pub async fn set_upload_stalled(&self, id: &ItemId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO torrent_telemetry (torrent_id, upload_stalled_since)
            VALUES (?, ?)
            ON CONFLICT (torrent_id) DO UPDATE SET
                upload_stalled_since = excluded.upload_stalled_since
            WHERE torrent_telemetry.upload_stalled_since IS NULL
            "#,
        )
        .bind(id)
        .bind(clock::format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark upload stalled: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Delete a telemetry row (item left the shadow)
    pub async fn delete_telemetry(&self, id: &ItemId) -> Result<()> {
        sqlx::query("DELETE FROM torrent_telemetry WHERE torrent_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete telemetry row: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
