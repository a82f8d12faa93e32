//! Error types for torbox-automation
//!
//! This module provides the error taxonomy used throughout the library:
//! - Domain-specific error types (Database, Api, Config, etc.)
//! - Classification of external API failures (auth vs. transient vs. protocol)
//! - A [`Result`] alias used by every fallible operation

use thiserror::Error;

/// Result type alias for torbox-automation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for torbox-automation
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "interval_multiplier")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// External API error (classified)
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Raw network error from the HTTP client (before classification)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found (user, rule, tag, ...)
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not starting new poll cycles
    #[error("shutdown in progress: not starting new poll cycles")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true if this error means the user's API key was rejected.
    ///
    /// The poller uses this to mark the user inactive in the registry
    /// instead of rescheduling the poll.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Api(ApiError::Auth { .. }))
    }

    /// Returns true if this error is a transient connection failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Api(ApiError::Transient(_)))
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Classified failures from the external TorBox API
///
/// The client maps every HTTP failure into exactly one of these variants so
/// that callers can branch on recovery strategy without re-inspecting status
/// codes or response bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API rejected the credentials (HTTP 401, or 403 with a known
    /// auth error code). The user must be marked inactive.
    #[error("authentication rejected: {detail}")]
    Auth {
        /// Machine-readable error code from the API, when present
        /// (`AUTH_ERROR`, `NO_AUTH`, `BAD_TOKEN`)
        code: Option<String>,
        /// Human-readable detail from the response body or status line
        detail: String,
    },

    /// Network-level failure or server-side 5xx. Safe to retry on a later
    /// cycle; list endpoints substitute an empty result.
    #[error("transient connection failure: {0}")]
    Transient(String),

    /// The API returned a response we could not interpret, or a
    /// non-transient application error.
    #[error("unexpected API response: {0}")]
    Protocol(String),
}
