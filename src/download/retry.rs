//! Failure classification and fixed-backoff retry decisions.
//!
//! Every failed attempt is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - the network or server may recover
//! - [`FailureType::Integrity`] - the transfer finished but the artifact was rejected
//! - [`FailureType::Unrecoverable`] - retrying this artifact cannot help
//!
//! The [`RetryPolicy`] turns a failure and the attempt count into a
//! [`RetryDecision`]. Transport failures and integrity rejections have
//! separate fixed delays; by default an integrity rejection retries
//! immediately while a transport failure waits two seconds.
//!
//! # Example
//!
//! ```
//! use gharchive_core::download::{
//!     DownloadError, FailureType, RetryDecision, RetryPolicy, classify_error,
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://data.gharchive.org/x.json.gz", 503);
//! let failure = classify_error(&error);
//! assert_eq!(failure, FailureType::Transient);
//!
//! match policy.should_retry(failure, 1, 3) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("not retrying: {reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::{INTEGRITY_BACKOFF, TRANSPORT_BACKOFF};

/// Default attempt budget per artifact.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeout, connection error, or non-2xx status.
    Transient,

    /// The downloaded artifact failed the integrity check.
    Integrity,

    /// Local IO failure, malformed URL, or cancellation.
    Unrecoverable,
}

/// Decision on whether to make another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the delay.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// The upcoming attempt number (1-indexed).
        attempt: u32,
    },

    /// Stop.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Fixed delays applied between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after a transient transport failure.
    transport_backoff: Duration,

    /// Delay after an integrity rejection.
    integrity_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transport_backoff: TRANSPORT_BACKOFF,
            integrity_backoff: INTEGRITY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit delays.
    #[must_use]
    pub fn new(transport_backoff: Duration, integrity_backoff: Duration) -> Self {
        Self {
            transport_backoff,
            integrity_backoff,
        }
    }

    /// A policy that never waits; useful against local mock servers.
    #[must_use]
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay after a transport failure.
    #[must_use]
    pub fn transport_backoff(&self) -> Duration {
        self.transport_backoff
    }

    /// Delay after an integrity rejection.
    #[must_use]
    pub fn integrity_backoff(&self) -> Duration {
        self.integrity_backoff
    }

    /// Decides whether attempt `attempt` (1-indexed) should be followed by another.
    #[instrument(level = "debug", skip(self))]
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        attempt: u32,
        max_attempts: u32,
    ) -> RetryDecision {
        let delay = match failure_type {
            FailureType::Unrecoverable => {
                return RetryDecision::DoNotRetry {
                    reason: "unrecoverable failure - retry would not help".to_string(),
                };
            }
            FailureType::Transient => self.transport_backoff,
            FailureType::Integrity => self.integrity_backoff,
        };

        if attempt >= max_attempts {
            debug!(attempt, max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({max_attempts}) exhausted"),
            };
        }

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a failed attempt.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout | Transient |
/// | Network | Transient |
/// | HttpStatus (any) | Transient |
/// | Integrity | Integrity |
/// | Io | Unrecoverable |
/// | InvalidUrl | Unrecoverable |
/// | Cancelled | Unrecoverable |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Timeout { .. }
        | DownloadError::Network { .. }
        | DownloadError::HttpStatus { .. } => FailureType::Transient,

        DownloadError::Integrity { .. } => FailureType::Integrity,

        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::Cancelled { .. } => FailureType::Unrecoverable,
    }
}
