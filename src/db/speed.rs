//! Speed history operations: append-only cumulative byte samples.

use crate::clock;
use crate::error::DatabaseError;
use crate::types::ItemId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{Database, SpeedSampleRow, in_placeholders};

impl Database {
    /// Append one speed sample and return its rowid.
    ///
    /// The rowid is monotonically increasing and drives the deterministic
    /// prune stride in the aggregator.
    pub async fn insert_speed_sample(
        &self,
        id: &ItemId,
        total_downloaded: i64,
        total_uploaded: i64,
        ts: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO speed_history (torrent_id, timestamp, total_downloaded, total_uploaded)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(clock::format_timestamp(ts))
        .bind(total_downloaded)
        .bind(total_uploaded)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert speed sample: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Load the samples for one item within `[from, to]`, oldest first.
    ///
    /// Timestamps are always written in the canonical fixed-width ISO form,
    /// so lexicographic comparison in SQL matches chronological order.
    pub async fn speed_samples_in_window(
        &self,
        id: &ItemId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SpeedSampleRow>> {
        let rows = sqlx::query_as::<_, SpeedSampleRow>(
            r#"
            SELECT id, torrent_id, timestamp, total_downloaded, total_uploaded
            FROM speed_history
            WHERE torrent_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(id)
        .bind(clock::format_timestamp(from))
        .bind(clock::format_timestamp(to))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load speed samples: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Batch-load samples newer than `from` for a set of items, grouped by
    /// item id and ordered oldest first within each group
    pub async fn speed_samples_since(
        &self,
        ids: &[ItemId],
        from: DateTime<Utc>,
    ) -> Result<HashMap<ItemId, Vec<SpeedSampleRow>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            r#"
            SELECT id, torrent_id, timestamp, total_downloaded, total_uploaded
            FROM speed_history
            WHERE timestamp >= ? AND torrent_id IN ({})
            ORDER BY timestamp ASC
            "#,
            in_placeholders(ids.len())
        );

        let mut query = sqlx::query_as::<_, SpeedSampleRow>(&sql);
        query = query.bind(clock::format_timestamp(from));
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to batch-load speed samples: {}",
                e
            )))
        })?;

        let mut grouped: HashMap<ItemId, Vec<SpeedSampleRow>> = HashMap::new();
        for row in rows {
            grouped.entry(row.torrent_id.clone()).or_default().push(row);
        }

        Ok(grouped)
    }

    /// Delete samples older than the cutoff, returning how many were removed
    pub async fn prune_speed_samples(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM speed_history WHERE timestamp < ?")
            .bind(clock::format_timestamp(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to prune speed samples: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }
}
