//! Per-user poll cycle.
//!
//! One cycle runs the whole chain for one user: fetch the snapshot, diff it
//! against the shadow, derive telemetry, record speed samples, evaluate every
//! enabled rule, dispatch matched actions, and write the next poll time back
//! to the registry. Steps are strictly ordered; every suspension point is an
//! HTTP call or a storage operation.
//!
//! At most one cycle runs per user at any instant, enforced by an RAII guard
//! in the shared [`ActivePolls`] set: the flag is set at entry and cleared on
//! every exit path, including cancellation.

use crate::client::TorboxClient;
use crate::config::Config;
use crate::db::{Database, NewExecutionLog};
use crate::diff::process_snapshot;
use crate::dispatch::ActionDispatcher;
use crate::registry::{Registry, RegistryUser};
use crate::rules::{Evaluation, Rule, RuleEvaluator};
use crate::speed::SpeedAggregator;
use crate::types::{AuthId, classify};
use crate::{Error, Result, telemetry};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The set of users with a poll cycle in flight.
///
/// A plain per-user flag, deliberately not a process-wide lock: users never
/// contend with each other, only with their own previous cycle.
#[derive(Debug, Default)]
pub struct ActivePolls {
    inner: Mutex<HashSet<AuthId>>,
}

impl ActivePolls {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the in-progress flag for a user. Returns `None` when a
    /// cycle is already running.
    pub fn try_begin(self: &Arc<Self>, auth_id: &AuthId) -> Option<PollGuard> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !inner.insert(auth_id.clone()) {
            return None;
        }
        Some(PollGuard {
            set: Arc::clone(self),
            auth_id: auth_id.clone(),
        })
    }

    /// Whether a cycle is currently running for this user
    pub fn is_running(&self, auth_id: &AuthId) -> bool {
        match self.inner.lock() {
            Ok(inner) => inner.contains(auth_id),
            Err(poisoned) => poisoned.into_inner().contains(auth_id),
        }
    }

    /// Number of cycles currently in flight
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether no cycle is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, auth_id: &AuthId) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.remove(auth_id);
    }
}

/// RAII claim on a user's in-progress flag; dropping releases it on every
/// exit path (success, error, skip, cancellation)
pub struct PollGuard {
    set: Arc<ActivePolls>,
    auth_id: AuthId,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.set.release(&self.auth_id);
    }
}

/// Why a cycle ended without doing any work
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// A cycle for this user is already in flight
    AlreadyRunning,
    /// The registry says the user has no enabled rules
    NoActiveRules,
}

/// What one poll cycle did
#[derive(Debug)]
pub enum CycleOutcome {
    /// The cycle ran to completion
    Completed(CycleReport),
    /// The cycle was skipped before fetching anything
    Skipped(SkipReason),
}

/// Summary of one completed cycle
#[derive(Debug)]
pub struct CycleReport {
    /// Items fetched from the API
    pub fetched: usize,
    /// Items observed for the first time
    pub new_items: usize,
    /// Items with changes
    pub updated: usize,
    /// Items removed (terminal or absent)
    pub removed: usize,
    /// Status transitions observed
    pub transitions: usize,
    /// Rules whose conditions were inspected (gate passed)
    pub rules_evaluated: usize,
    /// Rules whose action ran against at least one item
    pub rules_executed: usize,
    /// Items across all actions that succeeded
    pub actions_succeeded: usize,
    /// Items across all actions that failed
    pub actions_failed: usize,
    /// Non-terminal items in the snapshot
    pub non_terminal: i64,
    /// When this user polls next
    pub next_poll_at: DateTime<Utc>,
}

/// Runs poll cycles for registered users
pub struct UserPoller {
    registry: Arc<Registry>,
    config: Arc<Config>,
    active: Arc<ActivePolls>,
}

impl UserPoller {
    /// Create a poller sharing the registry and the in-progress set
    pub fn new(registry: Arc<Registry>, config: Arc<Config>, active: Arc<ActivePolls>) -> Self {
        Self {
            registry,
            config,
            active,
        }
    }

    /// Run one poll cycle for one user.
    ///
    /// An auth failure marks the user inactive before the error is
    /// returned; the user is then excluded from scheduling until an
    /// operator re-activates them.
    pub async fn poll(&self, user: &RegistryUser) -> Result<CycleOutcome> {
        let Some(_guard) = self.active.try_begin(&user.auth_id) else {
            tracing::debug!(auth_id = %user.auth_id, "poll already in flight, skipping");
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        if !user.has_active_rules {
            tracing::debug!(auth_id = %user.auth_id, "no active rules, skipping");
            return Ok(CycleOutcome::Skipped(SkipReason::NoActiveRules));
        }

        let api_key = self.registry.decrypt_key(user)?;
        let client = TorboxClient::new(&self.config.api, &api_key)?;
        let db = Database::new(Path::new(&user.db_path)).await?;

        // One captured instant keeps the whole cycle's diffs and telemetry
        // internally consistent
        let now = Utc::now();

        let result = self.run_cycle(user, &client, &db, now).await;
        db.close().await;

        match result {
            Ok(report) => {
                tracing::info!(
                    auth_id = %user.auth_id,
                    fetched = report.fetched,
                    updated = report.updated,
                    rules_executed = report.rules_executed,
                    next_poll_at = %report.next_poll_at,
                    "poll cycle complete"
                );
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) if e.is_auth() => {
                tracing::warn!(auth_id = %user.auth_id, error = %e, "auth rejected, deactivating user");
                self.registry.mark_inactive(&user.auth_id).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_cycle(
        &self,
        user: &RegistryUser,
        client: &TorboxClient,
        db: &Database,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let items = client.get_items(false).await?;

        let diff = process_snapshot(db, &items, now).await?;
        telemetry::apply_diff(db, &diff, now, self.config.telemetry.stall_window).await?;

        let aggregator = SpeedAggregator::new(db, &self.config.telemetry);
        aggregator.record_cycle(&diff, now).await?;

        let policy = self.config.interval_policy();
        let evaluator = RuleEvaluator::new(db, policy);
        let dispatcher = ActionDispatcher::new(db, client);

        let rule_rows = db.list_enabled_rules().await?;
        let rules: Vec<Rule> = rule_rows.iter().map(Rule::from_row).collect();

        let mut rules_evaluated = 0usize;
        let mut rules_executed = 0usize;
        let mut actions_succeeded = 0usize;
        let mut actions_failed = 0usize;

        for rule in &rules {
            let matched = match evaluator.evaluate(rule, &items, now).await? {
                Evaluation::Skipped => continue,
                Evaluation::Matched(matched) => matched,
            };

            rules_evaluated += 1;
            db.record_rule_evaluated(rule.id, now).await?;

            if matched.is_empty() {
                continue;
            }

            let Some(action) = &rule.action else {
                db.insert_execution_log(
                    &NewExecutionLog {
                        rule_id: rule.id,
                        rule_name: &rule.name,
                        execution_type: "invalid",
                        items_processed: 0,
                        success: false,
                        error_message: Some("rule has no usable action config"),
                    },
                    now,
                )
                .await?;
                continue;
            };

            match dispatcher.dispatch(action, matched, now).await {
                Ok(outcome) => {
                    db.insert_execution_log(
                        &NewExecutionLog {
                            rule_id: rule.id,
                            rule_name: &rule.name,
                            execution_type: action.kind(),
                            items_processed: outcome.attempted as i64,
                            success: outcome.all_succeeded(),
                            error_message: outcome.first_error.as_deref(),
                        },
                        now,
                    )
                    .await?;
                    db.record_rule_executed(rule.id, now).await?;
                    rules_executed += 1;
                    actions_succeeded += outcome.succeeded;
                    actions_failed += outcome.failed;
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e @ Error::Database(_)) | Err(e @ Error::Sqlx(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        auth_id = %user.auth_id,
                        rule_id = %rule.id,
                        error = %e,
                        "action dispatch failed"
                    );
                    let message = e.to_string();
                    db.insert_execution_log(
                        &NewExecutionLog {
                            rule_id: rule.id,
                            rule_name: &rule.name,
                            execution_type: action.kind(),
                            items_processed: 0,
                            success: false,
                            error_message: Some(message.as_str()),
                        },
                        now,
                    )
                    .await?;
                }
            }
        }

        if rules_executed > 0 {
            let retention = chrono::Duration::from_std(self.config.telemetry.log_retention)
                .unwrap_or(chrono::Duration::days(30));
            db.prune_execution_log(now - retention).await?;
        }

        let non_terminal = items
            .iter()
            .filter(|item| !classify(item).is_terminal())
            .count() as i64;

        // Recent rule activity (scaled like every other interval) keeps the
        // user on the active cadence even when this cycle matched nothing
        let recent_window = policy.scale_minutes(60.0);
        let recently_executed =
            rules_executed > 0 || db.has_execution_since(now - recent_window).await?;

        let delay = next_poll_delay(
            &policy,
            &rules,
            user.has_active_rules,
            recently_executed,
            non_terminal,
        );
        let next_poll_at = now + delay + self.stagger_offset();

        self.registry
            .update_poll_result(&user.auth_id, next_poll_at, non_terminal)
            .await?;

        Ok(CycleReport {
            fetched: items.len(),
            new_items: diff.new_items.len(),
            updated: diff.updated.len(),
            removed: diff.removed.len(),
            transitions: diff.transitions.len(),
            rules_evaluated,
            rules_executed,
            actions_succeeded,
            actions_failed,
            non_terminal,
            next_poll_at,
        })
    }

    /// Random offset spreading users across the global concurrency cap
    fn stagger_offset(&self) -> chrono::Duration {
        let window = self.config.poll.stagger_window;
        if window.is_zero() {
            return chrono::Duration::zero();
        }
        let millis = rand::thread_rng().gen_range(0..window.as_millis() as i64);
        chrono::Duration::milliseconds(millis)
    }
}

/// Pick the delay until the next poll.
///
/// Mode selection, in order: `no-rules` (60 min), `active` when this cycle
/// executed a rule or one executed within the last hour (the smallest
/// interval-trigger value across enabled rules; 5 min with non-terminal
/// items and no interval rules, else 30 min), otherwise `idle` (60 min
/// regardless of rule intervals, as a deliberate cap on polling cost). The
/// result is multiplier-scaled and clamped to the poll floor.
pub fn next_poll_delay(
    policy: &crate::clock::IntervalPolicy,
    rules: &[Rule],
    has_active_rules: bool,
    recently_executed: bool,
    non_terminal: i64,
) -> chrono::Duration {
    if !has_active_rules {
        return policy.poll_delay(60.0);
    }

    if recently_executed {
        let min_interval = rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| rule.trigger.as_ref())
            .map(|trigger| trigger.interval_minutes)
            .fold(f64::INFINITY, f64::min);

        if min_interval.is_finite() {
            return policy.poll_delay(min_interval);
        }
        if non_terminal > 0 {
            return policy.poll_delay(5.0);
        }
        return policy.poll_delay(30.0);
    }

    policy.poll_delay(60.0)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
