//! Derived-fields engine.
//!
//! Turns the cycle's diff into per-item telemetry the API cannot report:
//! last-activity timestamps and stall start markers, independently for the
//! download and upload sides. A side is stalled once its cumulative counter
//! has not advanced for the stall window while the item is still in a status
//! where progress is expected.
//!
//! A missing activity timestamp counts as infinitely old, mirroring the rule
//! evaluator's null-handling, so an item that never showed progress can
//! still be flagged stalled.

use crate::db::Database;
use crate::diff::SnapshotDiff;
use crate::types::{ItemId, classify};
use crate::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Apply one cycle's diff to the telemetry table
pub async fn apply_diff(
    db: &Database,
    diff: &SnapshotDiff,
    now: DateTime<Utc>,
    stall_window: Duration,
) -> Result<()> {
    let window = chrono::Duration::from_std(stall_window).unwrap_or(chrono::Duration::minutes(5));

    for item in &diff.new_items {
        // Seed activity only for items that already moved bytes; a fresh
        // item with zero totals has shown no activity yet.
        let download_at = (item.total_downloaded > 0).then_some(now);
        let upload_at = (item.total_uploaded > 0).then_some(now);
        db.insert_telemetry(&item.id, download_at, upload_at).await?;
    }

    if !diff.updated.is_empty() {
        let ids: Vec<ItemId> = diff.updated.iter().map(|u| u.item.id.clone()).collect();
        let telemetry = db.load_telemetry_for(&ids).await?;

        for updated in &diff.updated {
            let id = &updated.item.id;
            let row = telemetry.get(id);
            let status = classify(&updated.item);

            if updated.change.download_delta > 0 {
                db.set_download_activity(id, now).await?;
            } else if status.is_downloading_family() {
                let already_stalled = row.and_then(|r| r.stalled_since()).is_some();
                let quiet_long_enough = row
                    .and_then(|r| r.last_download_activity_at())
                    .is_none_or(|at| now - at >= window);
                if !already_stalled && quiet_long_enough {
                    db.set_download_stalled(id, now).await?;
                }
            }

            if updated.change.upload_delta > 0 {
                db.set_upload_activity(id, now).await?;
            } else if status.is_uploading_family() {
                let already_stalled = row.and_then(|r| r.upload_stalled_since()).is_some();
                let quiet_long_enough = row
                    .and_then(|r| r.last_upload_activity_at())
                    .is_none_or(|at| now - at >= window);
                if !already_stalled && quiet_long_enough {
                    db.set_upload_stalled(id, now).await?;
                }
            }
        }
    }

    for removed in &diff.removed {
        db.delete_telemetry(&removed.torrent_id).await?;
    }

    Ok(())
}
