//! Configuration types for torbox-automation

use crate::clock::{IntervalPolicy, MAX_MULTIPLIER, MIN_MULTIPLIER};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable scaling every configured interval (0.001..=1.0)
pub const ENV_INTERVAL_MULTIPLIER: &str = "DEV_INTERVAL_MULTIPLIER";
/// Environment variable overriding the global poll concurrency cap
pub const ENV_MAX_CONCURRENT_POLLS: &str = "MAX_CONCURRENT_POLLS";
/// Environment variable overriding the shutdown grace window in milliseconds
pub const ENV_POLL_TIMEOUT_MS: &str = "POLL_TIMEOUT_MS";
/// Environment variable overriding the TorBox API base URL
pub const ENV_API_BASE: &str = "TORBOX_API_BASE";
/// Environment variable overriding the TorBox API version path segment
pub const ENV_API_VERSION: &str = "TORBOX_API_VERSION";

/// External API connection settings
///
/// Groups everything needed to reach the TorBox HTTP API. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API base URL (default: "https://api.torbox.app")
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// API version path segment (default: "v1")
    #[serde(default = "default_api_version")]
    pub version: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            version: default_api_version(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Polling scheduler settings
///
/// Groups settings for the process-wide scheduler loop. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Maximum concurrent poll cycles process-wide (default: 7)
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,

    /// Delay between scheduler ticks (default: 30 seconds)
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// How long shutdown waits for in-flight polls before abandoning them
    /// (default: 300 seconds, overridable via `POLL_TIMEOUT_MS`)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,

    /// Upper bound of the random offset added to next-poll times to spread
    /// users across the concurrency cap (default: 30 seconds; zero disables)
    #[serde(default = "default_stagger_window")]
    pub stagger_window: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_concurrent_polls: default_max_concurrent_polls(),
            tick_interval: default_tick_interval(),
            shutdown_grace: default_shutdown_grace(),
            stagger_window: default_stagger_window(),
        }
    }
}

/// Telemetry derivation and retention settings
///
/// Groups the knobs of the derived-fields engine and the speed aggregator.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// How long cumulative totals must sit unchanged before an item counts
    /// as stalled (default: 5 minutes)
    #[serde(default = "default_stall_window")]
    pub stall_window: Duration,

    /// How long speed samples are retained (default: 24 hours)
    #[serde(default = "default_speed_retention")]
    pub speed_retention: Duration,

    /// Prune speed samples once every Nth inserted row (default: 10)
    #[serde(default = "default_speed_prune_stride")]
    pub speed_prune_stride: u32,

    /// How long rule execution log rows are retained (default: 30 days)
    #[serde(default = "default_log_retention")]
    pub log_retention: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stall_window: default_stall_window(),
            speed_retention: default_speed_retention(),
            speed_prune_stride: default_speed_prune_stride(),
            log_retention: default_log_retention(),
        }
    }
}

/// Main configuration for the automation controller
///
/// Fields are organized into logical sub-configs:
/// - [`api`](ApiConfig) — external API endpoint and timeout
/// - [`poll`](PollConfig) — scheduler tick, concurrency cap, shutdown grace
/// - [`telemetry`](TelemetryConfig) — stall window, sample retention
///
/// `interval_multiplier` scales every configured interval; see
/// [`IntervalPolicy`] for the clamping rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Interval multiplier (production: 1.0; reduced for testing)
    #[serde(default = "default_interval_multiplier")]
    pub interval_multiplier: f64,

    /// External API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Scheduler settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Telemetry settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_multiplier: default_interval_multiplier(),
            api: ApiConfig::default(),
            poll: PollConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Build a configuration from defaults plus environment overrides.
    ///
    /// Recognized variables: `DEV_INTERVAL_MULTIPLIER`,
    /// `MAX_CONCURRENT_POLLS`, `POLL_TIMEOUT_MS`, `TORBOX_API_BASE`,
    /// `TORBOX_API_VERSION`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(multiplier) = env_parse::<f64>(ENV_INTERVAL_MULTIPLIER) {
            config.interval_multiplier = multiplier.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);
        }
        if let Some(cap) = env_parse::<usize>(ENV_MAX_CONCURRENT_POLLS) {
            if cap > 0 {
                config.poll.max_concurrent_polls = cap;
            } else {
                tracing::warn!(
                    var = ENV_MAX_CONCURRENT_POLLS,
                    "ignoring zero concurrency cap"
                );
            }
        }
        if let Some(timeout_ms) = env_parse::<u64>(ENV_POLL_TIMEOUT_MS) {
            config.poll.shutdown_grace = Duration::from_millis(timeout_ms);
        }
        if let Ok(base) = std::env::var(ENV_API_BASE) {
            if !base.trim().is_empty() {
                config.api.base_url = base.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(version) = std::env::var(ENV_API_VERSION) {
            if !version.trim().is_empty() {
                config.api.version = version.trim().to_string();
            }
        }

        config
    }

    /// The interval policy derived from `interval_multiplier`
    pub fn interval_policy(&self) -> IntervalPolicy {
        IntervalPolicy::new(self.interval_multiplier)
    }
}

/// Read and parse an environment variable, warning on parse failure
fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var, value = trimmed, "ignoring unparseable environment override");
            None
        }
    }
}

fn default_api_base() -> String {
    "https://api.torbox.app".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrent_polls() -> usize {
    7
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_millis(300_000)
}

fn default_stagger_window() -> Duration {
    Duration::from_secs(30)
}

fn default_stall_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_speed_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_speed_prune_stride() -> u32 {
    10
}

fn default_log_retention() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_interval_multiplier() -> f64 {
    1.0
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            ENV_INTERVAL_MULTIPLIER,
            ENV_MAX_CONCURRENT_POLLS,
            ENV_POLL_TIMEOUT_MS,
            ENV_API_BASE,
            ENV_API_VERSION,
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.interval_multiplier, 1.0);
        assert_eq!(config.poll.max_concurrent_polls, 7);
        assert_eq!(config.poll.tick_interval, Duration::from_secs(30));
        assert_eq!(config.poll.shutdown_grace, Duration::from_millis(300_000));
        assert_eq!(config.api.base_url, "https://api.torbox.app");
        assert_eq!(config.api.version, "v1");
        assert_eq!(config.telemetry.stall_window, Duration::from_secs(300));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var(ENV_INTERVAL_MULTIPLIER, "0.01");
            std::env::set_var(ENV_MAX_CONCURRENT_POLLS, "3");
            std::env::set_var(ENV_POLL_TIMEOUT_MS, "60000");
            std::env::set_var(ENV_API_BASE, "https://torbox.test/");
            std::env::set_var(ENV_API_VERSION, "v2");
        }

        let config = Config::from_env();
        assert_eq!(config.interval_multiplier, 0.01);
        assert_eq!(config.poll.max_concurrent_polls, 3);
        assert_eq!(config.poll.shutdown_grace, Duration::from_secs(60));
        // Trailing slash is stripped so URL joins stay predictable
        assert_eq!(config.api.base_url, "https://torbox.test");
        assert_eq!(config.api.version, "v2");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_values_ignored() {
        clear_env();
        unsafe {
            std::env::set_var(ENV_INTERVAL_MULTIPLIER, "fast");
            std::env::set_var(ENV_MAX_CONCURRENT_POLLS, "0");
        }

        let config = Config::from_env();
        assert_eq!(config.interval_multiplier, 1.0);
        assert_eq!(config.poll.max_concurrent_polls, 7);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_multiplier_clamped_from_env() {
        clear_env();
        unsafe { std::env::set_var(ENV_INTERVAL_MULTIPLIER, "0.000001") };
        let config = Config::from_env();
        assert_eq!(config.interval_multiplier, 0.001);
        clear_env();
    }
}
