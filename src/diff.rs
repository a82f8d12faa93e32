//! Shadow state and diff engine.
//!
//! Compares one fetched snapshot against the per-user shadow of the previous
//! observation and produces the cycle's change set: new items, updated items
//! with byte deltas, removed items, and state transitions. Terminal items
//! are dropped from the shadow; items merely absent from the snapshot are
//! reported as removed but their shadow rows are kept, because one missing
//! snapshot is not authoritative (the API paginates and occasionally omits).

use crate::db::{Database, ShadowRow};
use crate::types::{Item, ItemId, ItemStatus, classify};
use crate::Result;
use chrono::{DateTime, Utc};

/// Field-level comparison of an item against its shadow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ItemChange {
    /// Whether anything below changed
    pub has_changes: bool,
    /// Whether the classified status changed
    pub state_changed: bool,
    /// Whether cumulative download bytes changed
    pub download_changed: bool,
    /// Whether cumulative upload bytes changed
    pub upload_changed: bool,
    /// Cumulative download delta since the last observation
    pub download_delta: i64,
    /// Cumulative upload delta since the last observation
    pub upload_delta: i64,
}

impl ItemChange {
    fn between(previous: &ShadowRow, item: &Item, status: ItemStatus) -> Self {
        let download_delta = item.total_downloaded - previous.last_total_downloaded;
        let upload_delta = item.total_uploaded - previous.last_total_uploaded;
        let state_changed = previous.last_state != status.as_str();
        let download_changed = download_delta != 0;
        let upload_changed = upload_delta != 0;

        Self {
            has_changes: state_changed || download_changed || upload_changed,
            state_changed,
            download_changed,
            upload_changed,
            download_delta,
            upload_delta,
        }
    }
}

/// An item that changed since the previous observation
#[derive(Clone, Debug)]
pub struct UpdatedItem {
    /// The current observation
    pub item: Item,
    /// What changed
    pub change: ItemChange,
    /// The shadow row the item was compared against
    pub previous: ShadowRow,
}

/// A status change observed between two cycles
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateTransition {
    /// The item that transitioned
    pub item_id: ItemId,
    /// Status label at the previous observation
    pub from: String,
    /// Classified status now
    pub to: ItemStatus,
    /// When the transition was observed
    pub at: DateTime<Utc>,
}

/// The change set produced by one snapshot
#[derive(Debug, Default)]
pub struct SnapshotDiff {
    /// Items observed for the first time (non-terminal)
    pub new_items: Vec<Item>,
    /// Items whose state or totals changed
    pub updated: Vec<UpdatedItem>,
    /// Shadow rows for items that went terminal or vanished from the
    /// snapshot. Terminal rows are deleted from the shadow; vanished rows
    /// are kept.
    pub removed: Vec<ShadowRow>,
    /// Status changes, one per updated item whose state changed
    pub transitions: Vec<StateTransition>,
}

/// Diff one snapshot against the shadow and persist the new observations.
///
/// Storage errors abort the cycle; the caller is the single writer for this
/// user's database, so a partial write is simply re-derived next cycle.
pub async fn process_snapshot(
    db: &Database,
    items: &[Item],
    now: DateTime<Utc>,
) -> Result<SnapshotDiff> {
    let mut shadow = db.load_shadow().await?;
    let mut diff = SnapshotDiff::default();

    for item in items {
        let status = classify(item);

        if status.is_terminal() {
            if let Some(previous) = shadow.remove(&item.id) {
                db.delete_shadow(&item.id).await?;
                diff.removed.push(previous);
            }
            continue;
        }

        match shadow.remove(&item.id) {
            None => {
                db.upsert_shadow(
                    &item.id,
                    item.total_downloaded,
                    item.total_uploaded,
                    status.as_str(),
                    now,
                )
                .await?;
                diff.new_items.push(item.clone());
            }
            Some(previous) => {
                let change = ItemChange::between(&previous, item, status);
                if !change.has_changes {
                    continue;
                }

                if change.state_changed {
                    diff.transitions.push(StateTransition {
                        item_id: item.id.clone(),
                        from: previous.last_state.clone(),
                        to: status,
                        at: now,
                    });
                }

                db.upsert_shadow(
                    &item.id,
                    item.total_downloaded,
                    item.total_uploaded,
                    status.as_str(),
                    now,
                )
                .await?;

                diff.updated.push(UpdatedItem {
                    item: item.clone(),
                    change,
                    previous,
                });
            }
        }
    }

    // Whatever is left in the shadow was absent from this snapshot. Report
    // it as removed but keep the rows: absence alone is not authoritative.
    diff.removed.extend(shadow.into_values());

    Ok(diff)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    async fn open_db() -> (NamedTempFile, Database) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();
        (temp_file, db)
    }

    fn downloading_item(id: &str, downloaded: i64, uploaded: i64) -> Item {
        Item {
            id: ItemId::from(id),
            name: format!("item-{id}"),
            active: true,
            seeds: 4,
            progress: 0.5,
            total_downloaded: downloaded,
            total_uploaded: uploaded,
            download_state: Some("downloading".into()),
            ..Item::default()
        }
    }

    fn seeding_item(id: &str, downloaded: i64, uploaded: i64) -> Item {
        Item {
            id: ItemId::from(id),
            name: format!("item-{id}"),
            active: true,
            download_finished: true,
            download_present: true,
            total_downloaded: downloaded,
            total_uploaded: uploaded,
            ..Item::default()
        }
    }

    fn completed_item(id: &str) -> Item {
        Item {
            id: ItemId::from(id),
            name: format!("item-{id}"),
            download_finished: true,
            download_present: true,
            ..Item::default()
        }
    }

    #[tokio::test]
    async fn test_new_item_inserted_into_shadow() {
        let (_file, db) = open_db().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

        let diff = process_snapshot(&db, &[downloading_item("1", 100, 0)], now)
            .await
            .unwrap();

        assert_eq!(diff.new_items.len(), 1);
        assert!(diff.updated.is_empty());
        assert!(diff.removed.is_empty());

        let row = db.get_shadow(&ItemId::from("1")).await.unwrap().unwrap();
        assert_eq!(row.last_total_downloaded, 100);
        assert_eq!(row.last_state, "downloading");
    }

    #[tokio::test]
    async fn test_unchanged_item_produces_nothing() {
        let (_file, db) = open_db().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let later = now + chrono::Duration::minutes(5);

        let item = downloading_item("1", 100, 0);
        process_snapshot(&db, std::slice::from_ref(&item), now)
            .await
            .unwrap();
        let diff = process_snapshot(&db, &[item], later).await.unwrap();

        assert!(diff.new_items.is_empty());
        assert!(diff.updated.is_empty());
        assert!(diff.removed.is_empty());
        assert!(diff.transitions.is_empty());

        // updated_at untouched for unchanged items
        let row = db.get_shadow(&ItemId::from("1")).await.unwrap().unwrap();
        assert_eq!(row.updated_at(), Some(now));
    }

    // Shadow has {dl=100, state=downloading}; the snapshot
    // delivers {dl=200} classifying as seeding.
    #[tokio::test]
    async fn test_state_transition_detected() {
        let (_file, db) = open_db().await;
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(5);

        process_snapshot(&db, &[downloading_item("42", 100, 0)], t0)
            .await
            .unwrap();

        let diff = process_snapshot(&db, &[seeding_item("42", 200, 0)], t1)
            .await
            .unwrap();

        assert_eq!(diff.updated.len(), 1);
        let updated = &diff.updated[0];
        assert_eq!(updated.change.download_delta, 100);
        assert!(updated.change.state_changed);
        assert!(updated.change.download_changed);
        assert!(!updated.change.upload_changed);

        assert_eq!(
            diff.transitions,
            vec![StateTransition {
                item_id: ItemId::from("42"),
                from: "downloading".to_string(),
                to: ItemStatus::Seeding,
                at: t1,
            }]
        );

        let row = db.get_shadow(&ItemId::from("42")).await.unwrap().unwrap();
        assert_eq!(row.last_total_downloaded, 200);
        assert_eq!(row.last_total_uploaded, 0);
        assert_eq!(row.last_state, "seeding");
    }

    // An item going terminal loses its shadow row.
    #[tokio::test]
    async fn test_terminal_item_dropped_from_shadow() {
        let (_file, db) = open_db().await;
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(5);

        process_snapshot(&db, &[downloading_item("7", 100, 0)], t0)
            .await
            .unwrap();

        let diff = process_snapshot(&db, &[completed_item("7")], t1)
            .await
            .unwrap();

        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].torrent_id, ItemId::from("7"));
        assert_eq!(diff.removed[0].last_state, "downloading");
        assert!(diff.updated.is_empty());
        assert!(diff.new_items.is_empty());

        assert!(db.get_shadow(&ItemId::from("7")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_item_never_shadowed() {
        let (_file, db) = open_db().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

        let diff = process_snapshot(&db, &[completed_item("9")], now)
            .await
            .unwrap();

        assert!(diff.removed.is_empty());
        assert!(diff.new_items.is_empty());
        assert!(db.get_shadow(&ItemId::from("9")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_absent_item_reported_but_shadow_kept() {
        let (_file, db) = open_db().await;
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(5);

        process_snapshot(&db, &[downloading_item("1", 100, 0)], t0)
            .await
            .unwrap();

        let diff = process_snapshot(&db, &[], t1).await.unwrap();

        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].torrent_id, ItemId::from("1"));

        // The row survives: absence is not authoritative
        assert!(db.get_shadow(&ItemId::from("1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upload_delta_tracked() {
        let (_file, db) = open_db().await;
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(5);

        process_snapshot(&db, &[seeding_item("1", 500, 100)], t0)
            .await
            .unwrap();
        let diff = process_snapshot(&db, &[seeding_item("1", 500, 250)], t1)
            .await
            .unwrap();

        assert_eq!(diff.updated.len(), 1);
        let change = diff.updated[0].change;
        assert_eq!(change.upload_delta, 150);
        assert!(change.upload_changed);
        assert!(!change.download_changed);
        assert!(!change.state_changed);
        assert!(diff.transitions.is_empty());
    }
}
