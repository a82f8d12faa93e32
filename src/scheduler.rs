//! Process-wide polling scheduler.
//!
//! Every tick (30 s by default) the scheduler asks the registry for users
//! due for polling and spawns a poll task for each, subject to two limits:
//! at most one in-flight poll per user (the shared [`ActivePolls`] set) and
//! at most `max_concurrent_polls` polls process-wide (a semaphore). Ticks
//! are sequential by construction (a tick finishes selecting and spawning
//! before the next sleep begins) and poll tasks never block the tick.
//!
//! Shutdown is cooperative: cancel the token, stop ticking, wait up to the
//! grace window for in-flight polls, then abandon the rest. Their
//! `next_poll_at` rows stay as-is, so the next startup re-selects them.

use crate::config::Config;
use crate::poller::{ActivePolls, CycleOutcome, UserPoller};
use crate::registry::Registry;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// The process-wide scheduler driving all user polls
pub struct PollScheduler {
    registry: Arc<Registry>,
    config: Arc<Config>,
    active: Arc<ActivePolls>,
    capacity: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl PollScheduler {
    /// Create a scheduler over the shared registry
    pub fn new(registry: Arc<Registry>, config: Arc<Config>) -> Self {
        let capacity = Arc::new(Semaphore::new(config.poll.max_concurrent_polls));
        Self {
            registry,
            config,
            active: Arc::new(ActivePolls::new()),
            capacity,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the scheduler when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The shared in-progress set (exposed for embedders that also run
    /// on-demand polls and must not race the scheduler)
    pub fn active_polls(&self) -> Arc<ActivePolls> {
        Arc::clone(&self.active)
    }

    /// Run the tick loop until the shutdown token fires, then drain
    /// in-flight polls within the grace window
    pub async fn run(self) {
        tracing::info!(
            cap = self.config.poll.max_concurrent_polls,
            tick_secs = self.config.poll.tick_interval.as_secs(),
            "polling scheduler started"
        );

        let mut tasks = JoinSet::new();

        loop {
            self.tick(&mut tasks).await;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll.tick_interval) => {}
            }
        }

        tracing::info!(
            in_flight = tasks.len(),
            "scheduler stopping, draining in-flight polls"
        );

        let drained = tokio::time::timeout(self.config.poll.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                abandoned = tasks.len(),
                "shutdown grace elapsed, abandoning in-flight polls"
            );
            tasks.abort_all();
        }

        tracing::info!("polling scheduler stopped");
    }

    /// One scheduling pass: reap finished tasks, select due users, spawn
    /// polls up to the concurrency cap
    async fn tick(&self, tasks: &mut JoinSet<()>) {
        while tasks.try_join_next().is_some() {}

        let now = chrono::Utc::now();
        let due = match self.registry.due_users(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "failed to select due users");
                return;
            }
        };

        if due.is_empty() {
            return;
        }
        tracing::debug!(due = due.len(), "tick selected due users");

        for user in due {
            if self.active.is_running(&user.auth_id) {
                continue;
            }

            // Saturated cap: remaining due users wait for a later tick.
            // Selection was soonest-due first, so nobody starves.
            let Ok(permit) = Arc::clone(&self.capacity).try_acquire_owned() else {
                tracing::debug!("concurrency cap saturated, deferring remaining due users");
                break;
            };

            let poller = UserPoller::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.config),
                Arc::clone(&self.active),
            );

            tasks.spawn(async move {
                let _permit = permit;
                let auth_id = user.auth_id.clone();
                match poller.poll(&user).await {
                    Ok(CycleOutcome::Completed(_)) => {}
                    Ok(CycleOutcome::Skipped(reason)) => {
                        tracing::debug!(auth_id = %auth_id, ?reason, "poll skipped");
                    }
                    Err(e) => {
                        tracing::error!(auth_id = %auth_id, error = %e, "poll cycle failed");
                    }
                }
            });
        }
    }
}
