//! # torbox-automation
//!
//! Multi-tenant automation controller library for the TorBox download
//! service. For each registered user the controller periodically fetches the
//! live item inventory, diffs it against a per-user shadow of the previous
//! observation, derives telemetry the API cannot report (stall durations,
//! last-activity timestamps, rolling speed samples), evaluates the user's
//! automation rules, and executes matched actions back against the API or
//! the user's local database.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or HTTP surface, purely a Rust crate for
//!   embedding
//! - **Per-user isolation** - One SQLite database and at most one in-flight
//!   poll per user; users never contend with each other
//! - **Cooperative scheduling** - A 30-second tick selects due users under a
//!   global concurrency cap; poll tasks never block the tick
//! - **Time-scalable** - Every interval passes through one multiplier, so
//!   hour-scale behavior can be observed in seconds during development
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use torbox_automation::{Config, PlainKeyDecryptor, PollScheduler, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::from_env());
//!     let registry = Arc::new(
//!         Registry::new(Path::new("data/registry.db"), Arc::new(PlainKeyDecryptor)).await?,
//!     );
//!
//!     let scheduler = PollScheduler::new(registry, config);
//!     torbox_automation::run_with_shutdown(scheduler).await;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// External API client
pub mod client;
/// Interval policy and persisted timestamp handling
pub mod clock;
/// Configuration types
pub mod config;
/// Per-user database persistence layer
pub mod db;
/// Shadow state and diff engine
pub mod diff;
/// Action dispatcher
pub mod dispatch;
/// Error types
pub mod error;
/// Per-user poll cycle
pub mod poller;
/// Shared user registry
pub mod registry;
/// Automation rules: model, validation, and evaluation
pub mod rules;
/// Polling scheduler
pub mod scheduler;
/// Speed samples and windowed averages
pub mod speed;
/// Derived-fields engine (stall and activity telemetry)
pub mod telemetry;
/// Core types: identifiers, wire items, status classifier
pub mod types;

// Re-export commonly used types
pub use client::{ControlOperation, ControlOutcome, TorboxClient};
pub use clock::IntervalPolicy;
pub use config::Config;
pub use db::Database;
pub use error::{ApiError, DatabaseError, Error, Result};
pub use poller::{ActivePolls, CycleOutcome, CycleReport, SkipReason, UserPoller};
pub use registry::{KeyDecryptor, PlainKeyDecryptor, Registry, RegistryUser, UserStatus};
pub use rules::{Action, Condition, Evaluation, Rule, RuleEvaluator};
pub use scheduler::PollScheduler;
pub use types::{AuthId, Item, ItemId, ItemStatus, RuleId, TagId, classify};

/// Run the scheduler with graceful signal handling.
///
/// Waits for a termination signal, cancels the scheduler's shutdown token,
/// and returns once in-flight polls have drained (or the grace window
/// elapsed).
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(scheduler: PollScheduler) {
    let token = scheduler.shutdown_token();
    let handle = tokio::spawn(scheduler.run());

    wait_for_signal().await;
    token.cancel();

    if let Err(e) = handle.await {
        tracing::error!(error = %e, "scheduler task ended abnormally");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
