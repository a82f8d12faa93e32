//! Tag operations: tag CRUD and the item/tag assignment table.

use crate::error::DatabaseError;
use crate::types::{ItemId, TagId};
use crate::{Error, Result};
use std::collections::HashMap;

use super::{Database, TagRow, in_placeholders};

impl Database {
    /// Create a tag. Names are unique case-insensitively.
    pub async fn create_tag(&self, name: &str) -> Result<TagId> {
        let result = sqlx::query("INSERT INTO tags (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
                    Error::Database(DatabaseError::ConstraintViolation(format!(
                        "Tag '{}' already exists",
                        name
                    )))
                } else {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to create tag: {}",
                        e
                    )))
                }
            })?;

        Ok(TagId(result.last_insert_rowid()))
    }

    /// List all tags, alphabetically
    pub async fn list_tags(&self) -> Result<Vec<TagRow>> {
        let rows = sqlx::query_as::<_, TagRow>("SELECT id, name FROM tags ORDER BY name COLLATE NOCASE ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list tags: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// Find a tag by name (case-insensitive)
    pub async fn find_tag(&self, name: &str) -> Result<Option<TagRow>> {
        let row = sqlx::query_as::<_, TagRow>("SELECT id, name FROM tags WHERE name = ? COLLATE NOCASE")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to find tag: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// Check that every tag id in the list exists
    pub async fn tags_exist(&self, ids: &[TagId]) -> Result<bool> {
        if ids.is_empty() {
            return Ok(true);
        }

        let sql = format!(
            "SELECT COUNT(*) FROM tags WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let count = query.fetch_one(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count tags: {}",
                e
            )))
        })?;

        Ok(count as usize == ids.len())
    }

    /// Tag ids assigned to one item
    pub async fn tags_for_item(&self, id: &ItemId) -> Result<Vec<TagId>> {
        let rows = sqlx::query_scalar::<_, TagId>(
            "SELECT tag_id FROM download_tags WHERE download_id = ? ORDER BY tag_id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load item tags: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Batch-load tag assignments for a set of items into a map keyed by
    /// item id. Items with no tags are absent from the map.
    pub async fn tags_for_items(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Vec<TagId>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT download_id, tag_id FROM download_tags WHERE download_id IN ({})",
            in_placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, (ItemId, TagId)>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to batch-load item tags: {}",
                e
            )))
        })?;

        let mut grouped: HashMap<ItemId, Vec<TagId>> = HashMap::new();
        for (item, tag) in rows {
            grouped.entry(item).or_default().push(tag);
        }

        Ok(grouped)
    }

    /// Assign every tag in `tags` to every item in `items`, in one
    /// transaction. Existing assignments are left untouched.
    pub async fn add_tags(&self, items: &[ItemId], tags: &[TagId]) -> Result<()> {
        if items.is_empty() || tags.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin tag transaction: {}",
                e
            )))
        })?;

        for item in items {
            for tag in tags {
                sqlx::query(
                    "INSERT OR IGNORE INTO download_tags (tag_id, download_id) VALUES (?, ?)",
                )
                .bind(tag)
                .bind(item)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to assign tag: {}",
                        e
                    )))
                })?;
            }
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit tag transaction: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Remove every tag in `tags` from every item in `items`, in one
    /// transaction. Missing assignments are ignored.
    pub async fn remove_tags(&self, items: &[ItemId], tags: &[TagId]) -> Result<()> {
        if items.is_empty() || tags.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin tag transaction: {}",
                e
            )))
        })?;

        for item in items {
            for tag in tags {
                sqlx::query("DELETE FROM download_tags WHERE tag_id = ? AND download_id = ?")
                    .bind(tag)
                    .bind(item)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Failed to remove tag: {}",
                            e
                        )))
                    })?;
            }
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit tag transaction: {}",
                e
            )))
        })?;

        Ok(())
    }
}
