//! Rule evaluation against one cycle's item batch.
//!
//! Evaluation is two-phase: a bulk preload of everything the rule's
//! conditions will read (tag assignments, telemetry, speed-history windows),
//! then a pure in-memory pass over the items. No per-item queries happen on
//! the hot path.

use super::{
    BoolField, CompareOp, Condition, ConditionGroup, LogicOp, NumericField, Rule, SetOp, TextField,
};
use crate::clock::IntervalPolicy;
use crate::db::{Database, SpeedSampleRow, TelemetryRow};
use crate::speed::{SpeedKind, windowed_average};
use crate::types::{Item, ItemId, TagId, classify};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Bytes per MB for rule-facing unit conversion
const MB: f64 = 1024.0 * 1024.0;

/// Extra speed-history coverage loaded beyond the widest condition window
const SPEED_WINDOW_HEADROOM: f64 = 1.5;

/// Result of evaluating one rule against one batch
#[derive(Debug)]
pub enum Evaluation {
    /// The interval trigger gated the rule; conditions were not inspected
    /// and `last_evaluated_at` must not be touched
    Skipped,
    /// The rule was evaluated; contains the matched items (possibly none)
    Matched(Vec<Item>),
}

/// Everything a condition may read, preloaded per batch
struct EvalContext<'a> {
    now: DateTime<Utc>,
    tags: &'a HashMap<ItemId, Vec<TagId>>,
    telemetry: &'a HashMap<ItemId, TelemetryRow>,
    speeds: &'a HashMap<ItemId, Vec<SpeedSampleRow>>,
}

/// Evaluates rules against item batches for one user's database
pub struct RuleEvaluator<'a> {
    db: &'a Database,
    policy: IntervalPolicy,
}

impl<'a> RuleEvaluator<'a> {
    /// Create an evaluator using the given interval policy for trigger gates
    pub fn new(db: &'a Database, policy: IntervalPolicy) -> Self {
        Self { db, policy }
    }

    /// Evaluate one rule against the batch.
    ///
    /// An interval-triggered rule evaluated again within its (multiplier-
    /// scaled) interval returns [`Evaluation::Skipped`] without inspecting
    /// any condition. A rule never evaluated before always proceeds.
    pub async fn evaluate(
        &self,
        rule: &Rule,
        items: &[Item],
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        if let (Some(trigger), Some(last)) = (&rule.trigger, rule.last_evaluated_at) {
            let min_gap = self.policy.scale_minutes(trigger.interval_minutes);
            if now - last < min_gap {
                tracing::debug!(
                    rule_id = %rule.id,
                    interval_minutes = trigger.interval_minutes,
                    "interval trigger gated rule"
                );
                return Ok(Evaluation::Skipped);
            }
        }

        let ids: Vec<ItemId> = items.iter().map(|item| item.id.clone()).collect();

        let tags = if rule.conditions().any(Condition::needs_tags) {
            self.db.tags_for_items(&ids).await?
        } else {
            HashMap::new()
        };

        let max_hours = rule
            .conditions()
            .filter_map(Condition::speed_window_hours)
            .fold(0.0_f64, f64::max);
        let speeds = if max_hours > 0.0 {
            let span_ms = max_hours * SPEED_WINDOW_HEADROOM * 3_600_000.0;
            let from = now - chrono::Duration::milliseconds(span_ms.round() as i64);
            self.db.speed_samples_since(&ids, from).await?
        } else {
            HashMap::new()
        };

        let telemetry = self.db.load_telemetry_for(&ids).await?;

        let ctx = EvalContext {
            now,
            tags: &tags,
            telemetry: &telemetry,
            speeds: &speeds,
        };

        let matched = items
            .iter()
            .filter(|item| rule_matches(rule, item, &ctx))
            .cloned()
            .collect();

        Ok(Evaluation::Matched(matched))
    }
}

fn rule_matches(rule: &Rule, item: &Item, ctx: &EvalContext<'_>) -> bool {
    // Legacy flat rule with zero conditions matches everything; a rule in
    // the grouped shape with no groups matches nothing.
    if rule.matches_all {
        return true;
    }
    if rule.groups.is_empty() {
        return false;
    }

    match rule.group_op {
        LogicOp::And => rule
            .groups
            .iter()
            .all(|group| group_matches(group, item, ctx)),
        LogicOp::Or => rule
            .groups
            .iter()
            .any(|group| group_matches(group, item, ctx)),
    }
}

fn group_matches(group: &ConditionGroup, item: &Item, ctx: &EvalContext<'_>) -> bool {
    // An empty group matches no item
    if group.conditions.is_empty() {
        return false;
    }

    match group.op {
        LogicOp::And => group
            .conditions
            .iter()
            .all(|condition| condition_matches(condition, item, ctx)),
        LogicOp::Or => group
            .conditions
            .iter()
            .any(|condition| condition_matches(condition, item, ctx)),
    }
}

fn condition_matches(condition: &Condition, item: &Item, ctx: &EvalContext<'_>) -> bool {
    match condition {
        Condition::Numeric {
            field,
            op,
            value,
            hours,
        } => numeric_matches(*field, *op, *value, *hours, item, ctx),
        Condition::Text { field, op, value } => {
            let haystack = match field {
                TextField::Name => item.name.to_lowercase(),
                TextField::Tracker => item
                    .tracker
                    .as_deref()
                    .unwrap_or_default()
                    .to_lowercase(),
            };
            op.compare(&haystack, value)
        }
        Condition::Bool { field, expect } => bool_value(item, *field) == *expect,
        Condition::BoolNumeric { field, op, value } => {
            let flag = if bool_value(item, *field) { 1.0 } else { 0.0 };
            op.compare(flag, *value)
        }
        Condition::Status { op, statuses } => {
            let status = classify(item);
            match op {
                SetOp::AnyOf => statuses.contains(&status),
                SetOp::AllOf => statuses.iter().all(|wanted| *wanted == status),
                SetOp::NoneOf => !statuses.contains(&status),
            }
        }
        Condition::Tags { op, tags } => {
            static NO_TAGS: Vec<TagId> = Vec::new();
            let assigned = ctx.tags.get(&item.id).unwrap_or(&NO_TAGS);
            match op {
                SetOp::AnyOf => tags.iter().any(|tag| assigned.contains(tag)),
                SetOp::AllOf => tags.iter().all(|tag| assigned.contains(tag)),
                SetOp::NoneOf => !tags.iter().any(|tag| assigned.contains(tag)),
            }
        }
        Condition::Invalid { reason } => {
            tracing::debug!(item_id = %item.id, reason, "invalid condition never matches");
            false
        }
    }
}

fn numeric_matches(
    field: NumericField,
    op: CompareOp,
    threshold: f64,
    hours: f64,
    item: &Item,
    ctx: &EvalContext<'_>,
) -> bool {
    let telemetry = ctx.telemetry.get(&item.id);

    let lhs = match field {
        // Elapsed-time fields: a missing source timestamp means no-match,
        // except where null means "never", which counts as infinitely old
        NumericField::SeedingTime => match item.cached_at {
            Some(at) => hours_since(ctx.now, at),
            None => return false,
        },
        NumericField::Age => match item.created_at {
            Some(at) => hours_since(ctx.now, at),
            None => return false,
        },
        NumericField::LastDownloadActivity => {
            match telemetry.and_then(|row| row.last_download_activity_at()) {
                Some(at) => minutes_since(ctx.now, at),
                // Never-active counts as infinitely long ago: only gt/gte
                // can match
                None => return op.matches_infinity(),
            }
        }
        NumericField::LastUploadActivity => {
            match telemetry.and_then(|row| row.last_upload_activity_at()) {
                Some(at) => minutes_since(ctx.now, at),
                None => return op.matches_infinity(),
            }
        }
        NumericField::DownloadStalledTime => match telemetry.and_then(|row| row.stalled_since()) {
            Some(at) => minutes_since(ctx.now, at),
            None => return false,
        },
        NumericField::UploadStalledTime => {
            match telemetry.and_then(|row| row.upload_stalled_since()) {
                Some(at) => minutes_since(ctx.now, at),
                None => return false,
            }
        }
        NumericField::ExpiresAt => match item.expires_at {
            Some(at) => {
                let remaining = hours_until(ctx.now, at);
                // An already-expired item can never satisfy a "more than X
                // hours left" condition
                if remaining < 0.0 && op.matches_infinity() {
                    return false;
                }
                remaining
            }
            None => return false,
        },
        NumericField::Progress => item.progress,
        NumericField::DownloadSpeed => item.download_speed as f64 / MB,
        NumericField::UploadSpeed => item.upload_speed as f64 / MB,
        NumericField::AvgDownloadSpeed | NumericField::AvgUploadSpeed => {
            static NO_SAMPLES: Vec<SpeedSampleRow> = Vec::new();
            let samples = ctx.speeds.get(&item.id).unwrap_or(&NO_SAMPLES);
            let from = ctx.now - chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64);
            let kind = if field == NumericField::AvgDownloadSpeed {
                SpeedKind::Download
            } else {
                SpeedKind::Upload
            };
            windowed_average(samples, from, ctx.now, kind) / MB
        }
        NumericField::Eta => item.eta as f64 / 60.0,
        NumericField::Seeds => item.seeds as f64,
        NumericField::Peers => item.peers as f64,
        NumericField::Ratio => item.effective_ratio(),
        NumericField::TotalUploaded => item.total_uploaded as f64 / MB,
        NumericField::TotalDownloaded => item.total_downloaded as f64 / MB,
        NumericField::FileSize => item.size as f64 / MB,
        NumericField::FileCount => item.file_count() as f64,
        NumericField::Availability => item.availability,
    };

    op.compare(lhs, threshold)
}

fn bool_value(item: &Item, field: BoolField) -> bool {
    match field {
        BoolField::Private => item.private,
        BoolField::Cached => item.cached,
        BoolField::AllowZip => item.allow_zipped,
        BoolField::IsActive => item.active,
        BoolField::SeedingEnabled => item.seed_torrent,
        BoolField::LongTermSeeding => item.long_term_seeding,
    }
}

fn minutes_since(now: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (now - at).num_milliseconds() as f64 / 60_000.0
}

fn hours_since(now: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (now - at).num_milliseconds() as f64 / 3_600_000.0
}

fn hours_until(now: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (at - now).num_milliseconds() as f64 / 3_600_000.0
}
