//! Progress and diagnostic events emitted by the fetch pipeline.
//!
//! Components never log control-flow outcomes directly; they hand a
//! [`FetchEvent`] to the [`EventSink`] they were constructed with. The
//! default [`TracingSink`] forwards events to `tracing`.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::engine::RunSummary;
use super::error::DownloadError;
use super::integrity::IntegrityViolation;

/// Something observable happened while resolving a bucket.
#[derive(Debug)]
pub enum FetchEvent<'a> {
    /// A year's pass is starting.
    YearStarted {
        /// The year.
        year: i32,
        /// Directory the year's artifacts are stored under.
        dir: &'a Path,
        /// Number of buckets in the year.
        total: usize,
    },
    /// A year's pass has finished.
    YearFinished {
        /// Final counters.
        summary: &'a RunSummary,
    },
    /// A local artifact passed the integrity check; no fetch needed.
    AlreadyValid {
        /// The artifact.
        path: &'a Path,
    },
    /// A local artifact failed the integrity check and will be replaced.
    CorruptOnDisk {
        /// The artifact.
        path: &'a Path,
        /// Why it was rejected.
        violation: &'a IntegrityViolation,
    },
    /// A corrupt local artifact could not be removed.
    RemoveFailed {
        /// The artifact.
        path: &'a Path,
        /// The removal error.
        error: &'a DownloadError,
    },
    /// A fetch attempt is starting.
    AttemptStarted {
        /// Source URL.
        url: &'a str,
        /// 1-indexed attempt number.
        attempt: u32,
        /// Attempt budget.
        max_attempts: u32,
    },
    /// A fetched artifact passed verification and was kept.
    Verified {
        /// The artifact.
        path: &'a Path,
        /// Bytes written.
        bytes: u64,
        /// Attempt that succeeded.
        attempt: u32,
    },
    /// A fetched artifact failed verification and was discarded.
    IntegrityRejected {
        /// The discarded artifact.
        path: &'a Path,
        /// Attempt that produced it.
        attempt: u32,
        /// Why it was rejected.
        violation: &'a IntegrityViolation,
    },
    /// A transport-level failure; the partial file was discarded.
    TransportFailed {
        /// Source URL.
        url: &'a str,
        /// Attempt that failed.
        attempt: u32,
        /// The failure.
        error: &'a DownloadError,
    },
    /// Waiting before the next attempt.
    BackingOff {
        /// Source URL.
        url: &'a str,
        /// Upcoming attempt number.
        next_attempt: u32,
        /// Delay before it starts.
        delay: Duration,
    },
    /// Retrying stopped early on an unrecoverable error.
    Aborted {
        /// Source URL.
        url: &'a str,
        /// Attempt that hit the error.
        attempt: u32,
        /// The error.
        error: &'a DownloadError,
    },
    /// Every attempt failed.
    Exhausted {
        /// Source URL.
        url: &'a str,
        /// Attempts made.
        attempts: u32,
    },
    /// The integrity check found no file or could not read it.
    IntegrityIoError {
        /// The artifact.
        path: &'a Path,
        /// What went wrong.
        violation: &'a IntegrityViolation,
    },
}

/// Receiver for [`FetchEvent`]s.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: &FetchEvent<'_>);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &FetchEvent<'_>) {
        match event {
            FetchEvent::YearStarted { year, dir, total } => {
                info!(year, dir = %dir.display(), total, "starting year");
            }
            FetchEvent::YearFinished { summary } => {
                info!(
                    year = summary.year(),
                    total = summary.total_buckets(),
                    downloaded = summary.downloaded_now(),
                    already_valid = summary.already_valid(),
                    failed = summary.failed(),
                    outstanding = summary.outstanding(),
                    "year finished"
                );
            }
            FetchEvent::AlreadyValid { path } => {
                debug!(path = %path.display(), "already present and complete");
            }
            FetchEvent::CorruptOnDisk { path, violation } => {
                info!(path = %path.display(), %violation, "present but incomplete, re-downloading");
            }
            FetchEvent::RemoveFailed { path, error } => {
                warn!(path = %path.display(), %error, "could not remove corrupt artifact");
            }
            FetchEvent::AttemptStarted {
                url,
                attempt,
                max_attempts,
            } => {
                info!(url, attempt, max_attempts, "downloading");
            }
            FetchEvent::Verified {
                path,
                bytes,
                attempt,
            } => {
                info!(path = %path.display(), bytes, attempt, "downloaded and verified");
            }
            FetchEvent::IntegrityRejected {
                path,
                attempt,
                violation,
            } => {
                warn!(path = %path.display(), attempt, %violation, "download failed integrity check");
            }
            FetchEvent::TransportFailed {
                url,
                attempt,
                error,
            } => {
                warn!(url, attempt, %error, "download attempt failed");
            }
            FetchEvent::BackingOff {
                url,
                next_attempt,
                delay,
            } => {
                debug!(url, next_attempt, delay_ms = delay.as_millis(), "backing off");
            }
            FetchEvent::Aborted {
                url,
                attempt,
                error,
            } => {
                warn!(url, attempt, %error, "unrecoverable error, giving up");
            }
            FetchEvent::Exhausted { url, attempts } => {
                warn!(url, attempts, "all attempts failed");
            }
            FetchEvent::IntegrityIoError { path, violation } => {
                warn!(path = %path.display(), %violation, "integrity check could not read file");
            }
        }
    }
}
