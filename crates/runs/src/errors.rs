//! Error and retry-policy types for the workflow-run domain.
//!
//! One error type per failure class of the dispatch/monitor lifecycle:
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`DispatchError`] | Workflow Control API, dispatch call | Propagated to the caller of the dispatcher |
//! | [`FetchError`] | Workflow Control API, list-runs call | Logged; the monitor retries on its next poll |
//! | [`StorageError`] | Persistence gateway | Logged and swallowed at every call site |
//! | [`ConfigError`] | Configuration loading | Fatal at start-up |
//!
//! A monitor that exhausts its attempt budget is not an error; it is a logged
//! terminal condition reported through `MonitorOutcome` in the `tracker` crate.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the monitor decide how long
/// to back off before its next poll.
///
/// - `Retryable` errors: API timeouts, transient rate-limit responses, 5xx.
/// - `NonRetryable` errors: authentication failures, unknown workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `Retry-After` or `x-ratelimit-reset` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// Retrying is not expected to help.
    NonRetryable,
}

impl RetryPolicy {
    /// The minimum delay requested by the upstream service, if any.
    pub fn min_delay(&self) -> Option<Duration> {
        match self {
            RetryPolicy::Retryable { after } => *after,
            RetryPolicy::NonRetryable => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow Control API errors
// ---------------------------------------------------------------------------

/// The workflow-dispatch call did not succeed.
///
/// This is the only error allowed to leave the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// GitHub answered with a non-success status.
    #[error("Dispatch rejected with HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code returned by the API.
        status: u16,
        /// The `message` field of the error body, or the raw body.
        message: String,
    },

    /// The request never produced a response (connection, TLS, timeout).
    #[error("Dispatch request failed: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },
}

impl DispatchError {
    /// The upstream HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Rejected { status, .. } => Some(*status),
            DispatchError::Transport { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------

/// Polling the list-runs endpoint failed.
///
/// Always transient from the monitor's point of view: it is logged and the
/// attempt counts toward the monitor's budget.
#[derive(Debug, Error)]
#[error("Fetching workflow runs failed: {message}")]
pub struct FetchError {
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Human-readable description.
    pub message: String,
    /// Back-off hint derived from the response.
    pub retry: RetryPolicy,
}

impl FetchError {
    /// A failure without a response or back-off hint.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            retry: RetryPolicy::Retryable { after: None },
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// A persistence gateway operation failed.
///
/// The gateway never retries internally; callers decide. In the dispatch and
/// monitor paths every `StorageError` is logged and swallowed.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be reached or a connection could not be acquired.
    #[error("Storage connection failed: {message}")]
    Connection {
        /// Description of the connectivity problem.
        message: String,
    },

    /// A statement failed to execute.
    #[error("Storage operation '{operation}' failed: {message}")]
    Query {
        /// Short name of the gateway operation.
        operation: &'static str,
        /// Description reported by the backend.
        message: String,
    },

    /// A uniqueness rule was violated (e.g. a run id already carried by
    /// another record).
    #[error("Storage conflict: {message}")]
    Conflict {
        /// Description of the violated rule.
        message: String,
    },

    /// A stored row could not be decoded into a domain record.
    #[error("Invalid stored row: {message}")]
    InvalidRow {
        /// Description of the decoding problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Configuration could not be loaded or is invalid.
///
/// Produced at load time; the service never starts with an invalid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent.
    #[error("Missing required configuration: {key}")]
    Missing {
        /// Environment variable or file key.
        key: String,
    },

    /// A setting is present but cannot be used.
    #[error("Invalid configuration value for {key}: {message}")]
    Invalid {
        /// Environment variable or file key.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
}
