//! One logical download: request, stream to disk, verify, accept or discard.
//!
//! [`RetryingFetcher`] repeats single attempts made with [`HttpClient`]
//! until the artifact passes the [`IntegrityChecker`], the attempt budget
//! runs out, or an unrecoverable error ends the loop early. Whatever the
//! outcome, a failed fetch never leaves a file at the destination.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::client::{HttpClient, remove_if_exists};
use super::error::DownloadError;
use super::events::{EventSink, FetchEvent};
use super::integrity::IntegrityChecker;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};

/// What to fetch and where to put it.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Source URL.
    pub url: &'a str,
    /// Destination path; its parent directory must exist.
    pub dest: &'a Path,
    /// Attempt budget, at least one attempt is always made.
    pub max_attempts: u32,
}

/// A verified artifact now sits at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetched {
    /// Bytes written by the successful attempt.
    pub bytes: u64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// The fetch failed; the destination path does not exist.
#[derive(Debug, Error)]
pub enum FetchFailed {
    /// Every attempt failed with a retryable error.
    #[error("gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Source URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last_error: DownloadError,
    },

    /// Retrying stopped on an unrecoverable error.
    #[error("aborted {url} on attempt {attempt}: {error}")]
    Aborted {
        /// Source URL.
        url: String,
        /// Attempt that hit the error.
        attempt: u32,
        /// The unrecoverable error.
        #[source]
        error: DownloadError,
    },
}

impl FetchFailed {
    /// Attempts made before giving up.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The error that ended the fetch.
    #[must_use]
    pub fn last_error(&self) -> &DownloadError {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Aborted { error, .. } => error,
        }
    }
}

/// Fetches one artifact with retries.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs the fetch described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailed`] when no verified artifact could be produced.
    async fn fetch(
        &self,
        request: &FetchRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchFailed>;
}

/// [`Fetcher`] backed by HTTP with fixed-backoff retries.
#[derive(Clone)]
pub struct RetryingFetcher {
    client: HttpClient,
    policy: RetryPolicy,
    integrity: IntegrityChecker,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for RetryingFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("policy", &self.policy)
            .field("integrity", &self.integrity)
            .finish_non_exhaustive()
    }
}

impl RetryingFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        client: HttpClient,
        policy: RetryPolicy,
        integrity: IntegrityChecker,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            policy,
            integrity,
            sink,
        }
    }

    /// The retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one attempt, returning the verified size or the error that ended it.
    async fn attempt_once(
        &self,
        request: &FetchRequest<'_>,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let bytes = self
            .client
            .download_to_path(request.url, request.dest, cancel)
            .await
            .inspect_err(|error| {
                if classify_error(error) == FailureType::Transient {
                    self.sink.emit(&FetchEvent::TransportFailed {
                        url: request.url,
                        attempt,
                        error,
                    });
                }
            })?;

        match self.integrity.inspect(request.dest).await {
            Ok(()) => Ok(bytes),
            Err(violation) => {
                self.sink.emit(&FetchEvent::IntegrityRejected {
                    path: request.dest,
                    attempt,
                    violation: &violation,
                });
                Err(DownloadError::integrity(request.dest, violation))
            }
        }
    }

    fn abort(&self, url: &str, attempt: u32, error: DownloadError) -> FetchFailed {
        self.sink.emit(&FetchEvent::Aborted {
            url,
            attempt,
            error: &error,
        });
        FetchFailed::Aborted {
            url: url.to_string(),
            attempt,
            error,
        }
    }
}

#[async_trait]
impl Fetcher for RetryingFetcher {
    #[instrument(skip(self, cancel), fields(url = %request.url, dest = %request.dest.display()))]
    async fn fetch(
        &self,
        request: &FetchRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchFailed> {
        let max_attempts = request.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.sink.emit(&FetchEvent::AttemptStarted {
                url: request.url,
                attempt,
                max_attempts,
            });

            let error = match self.attempt_once(request, attempt, cancel).await {
                Ok(bytes) => {
                    self.sink.emit(&FetchEvent::Verified {
                        path: request.dest,
                        bytes,
                        attempt,
                    });
                    return Ok(Fetched {
                        bytes,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            // Nothing unverified may remain at the destination between attempts.
            if let Err(cleanup) = remove_if_exists(request.dest).await {
                return Err(self.abort(request.url, attempt, cleanup));
            }

            match self
                .policy
                .should_retry(classify_error(&error), attempt, max_attempts)
            {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    if delay.is_zero() {
                        continue;
                    }
                    self.sink.emit(&FetchEvent::BackingOff {
                        url: request.url,
                        next_attempt,
                        delay,
                    });
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Err(self.abort(
                                request.url,
                                attempt,
                                DownloadError::cancelled(request.url),
                            ));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry { .. } => {
                    if classify_error(&error) == FailureType::Unrecoverable {
                        return Err(self.abort(request.url, attempt, error));
                    }
                    self.sink.emit(&FetchEvent::Exhausted {
                        url: request.url,
                        attempts: attempt,
                    });
                    return Err(FetchFailed::Exhausted {
                        url: request.url.to_string(),
                        attempts: attempt,
                        last_error: error,
                    });
                }
            }
        }
    }
}
