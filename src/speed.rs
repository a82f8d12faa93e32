//! Speed aggregator.
//!
//! Appends cumulative byte counters for active items each cycle and computes
//! average speeds over a window as an endpoint delta: `(last - first) /
//! (t_last - t_first)`. Retention is enforced opportunistically: once every
//! Nth inserted row (by rowid, so the stride is deterministic across
//! restarts) old samples are pruned.

use crate::config::TelemetryConfig;
use crate::db::{Database, SpeedSampleRow};
use crate::diff::SnapshotDiff;
use crate::types::ItemId;
use crate::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Which counter an average is computed over
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedKind {
    /// Cumulative downloaded bytes
    Download,
    /// Cumulative uploaded bytes
    Upload,
}

/// Records and aggregates speed samples for one user's database
pub struct SpeedAggregator<'a> {
    db: &'a Database,
    retention: Duration,
    prune_stride: u32,
}

impl<'a> SpeedAggregator<'a> {
    /// Create an aggregator with the configured retention and prune stride
    pub fn new(db: &'a Database, config: &TelemetryConfig) -> Self {
        Self {
            db,
            retention: config.speed_retention,
            prune_stride: config.speed_prune_stride.max(1),
        }
    }

    /// Append samples for every updated item whose transfer is active
    pub async fn record_cycle(&self, diff: &SnapshotDiff, now: DateTime<Utc>) -> Result<()> {
        for updated in &diff.updated {
            if !updated.item.active {
                continue;
            }

            let rowid = self
                .db
                .insert_speed_sample(
                    &updated.item.id,
                    updated.item.total_downloaded,
                    updated.item.total_uploaded,
                    now,
                )
                .await?;

            if rowid % self.prune_stride as i64 == 0 {
                let cutoff = now
                    - chrono::Duration::from_std(self.retention)
                        .unwrap_or(chrono::Duration::hours(24));
                let removed = self.db.prune_speed_samples(cutoff).await?;
                if removed > 0 {
                    tracing::debug!(removed, "pruned speed history");
                }
            }
        }

        Ok(())
    }

    /// Average speed in bytes/s over the trailing `hours` window.
    ///
    /// Returns 0 with fewer than two samples in the window or a zero time
    /// delta.
    pub async fn average_speed(
        &self,
        id: &ItemId,
        hours: f64,
        kind: SpeedKind,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let from = now - chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64);
        let samples = self.db.speed_samples_in_window(id, from, now).await?;
        Ok(endpoint_average(&samples, kind))
    }
}

/// Endpoint-delta average over an already-windowed, time-ordered sample run
pub fn endpoint_average(samples: &[SpeedSampleRow], kind: SpeedKind) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return 0.0;
    };
    if samples.len() < 2 {
        return 0.0;
    }

    let (Some(t0), Some(t1)) = (first.timestamp(), last.timestamp()) else {
        return 0.0;
    };
    let elapsed = (t1 - t0).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 {
        return 0.0;
    }

    let delta = match kind {
        SpeedKind::Download => last.total_downloaded - first.total_downloaded,
        SpeedKind::Upload => last.total_uploaded - first.total_uploaded,
    };

    delta as f64 / elapsed
}

/// Endpoint-delta average restricted to samples within `[from, to]`.
///
/// Used by the rule evaluator against its bulk-preloaded sample runs, which
/// cover a wider window than any single condition.
pub fn windowed_average(
    samples: &[SpeedSampleRow],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    kind: SpeedKind,
) -> f64 {
    let windowed: Vec<SpeedSampleRow> = samples
        .iter()
        .filter(|sample| {
            sample
                .timestamp()
                .is_some_and(|ts| ts >= from && ts <= to)
        })
        .cloned()
        .collect();
    endpoint_average(&windowed, kind)
}
