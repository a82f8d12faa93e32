//! Shadow table operations: last-observed totals and state per item.

use crate::clock;
use crate::error::DatabaseError;
use crate::types::ItemId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{Database, ShadowRow};

impl Database {
    /// Load the entire shadow into a map keyed by item id.
    ///
    /// The diff engine works against the full shadow; per-user item counts
    /// are small enough that this is one cheap query per cycle.
    pub async fn load_shadow(&self) -> Result<HashMap<ItemId, ShadowRow>> {
        let rows = sqlx::query_as::<_, ShadowRow>(
            r#"
            SELECT torrent_id, last_total_downloaded, last_total_uploaded, last_state, updated_at
            FROM torrent_shadow
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load shadow: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|row| (row.torrent_id.clone(), row))
            .collect())
    }

    /// Get a single shadow row
    pub async fn get_shadow(&self, id: &ItemId) -> Result<Option<ShadowRow>> {
        let row = sqlx::query_as::<_, ShadowRow>(
            r#"
            SELECT torrent_id, last_total_downloaded, last_total_uploaded, last_state, updated_at
            FROM torrent_shadow
            WHERE torrent_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get shadow row: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Insert or update a shadow row with the current observation
    pub async fn upsert_shadow(
        &self,
        id: &ItemId,
        total_downloaded: i64,
        total_uploaded: i64,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO torrent_shadow (
                torrent_id, last_total_downloaded, last_total_uploaded, last_state, updated_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (torrent_id) DO UPDATE SET
                last_total_downloaded = excluded.last_total_downloaded,
                last_total_uploaded = excluded.last_total_uploaded,
                last_state = excluded.last_state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(total_downloaded)
        .bind(total_uploaded)
        .bind(state)
        .bind(clock::format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert shadow row: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Delete a shadow row (item reached a terminal status)
    pub async fn delete_shadow(&self, id: &ItemId) -> Result<()> {
        sqlx::query("DELETE FROM torrent_shadow WHERE torrent_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete shadow row: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
