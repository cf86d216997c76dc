//! Year-level orchestration: enumerate, inspect local state, fetch what is missing.
//!
//! The [`DownloadOrchestrator`] walks an [`HourlyRange`], decides for each
//! bucket whether the local artifact is already valid, corrupt, or absent,
//! and delegates to a [`Fetcher`] only when needed. Local state is never
//! cached between runs, so rerunning over the same year is idempotent.
//!
//! # Concurrency Model
//!
//! - With `concurrency == 1` (the default) buckets are resolved strictly in
//!   enumeration order, one at a time
//! - Higher values resolve up to that many buckets at once; each bucket owns
//!   a distinct local path, so no two workers touch the same file
//! - Backoff sleeps happen inside each fetch, never on a shared timer
//! - [`RunSummary`] counters are atomic
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gharchive_core::FetchConfig;
//! use gharchive_core::download::DownloadOrchestrator;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FetchConfig::builder().base_dir("/data").build()?;
//! let orchestrator = DownloadOrchestrator::from_config(&config)?;
//! let summary = orchestrator.run_year(2021, &CancellationToken::new()).await?;
//! println!("{} downloaded, {} already valid", summary.downloaded_now(), summary.already_valid());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::client::{HttpClient, remove_if_exists};
use super::events::{EventSink, FetchEvent, TracingSink};
use super::fetch::{FetchRequest, Fetcher, RetryingFetcher};
use super::integrity::IntegrityChecker;
use super::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};
use crate::config::{ConfigError, FetchConfig, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::range::{ArtifactLayout, ArtifactRef, HourlyRange, RangeError, TimeBucket};

/// Default number of buckets resolved at once.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Errors that stop a run before any bucket is fetched.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The year cannot be enumerated.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// The run configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The per-year directory could not be created.
    #[error("cannot prepare output directory {path}: {source}")]
    OutputDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built.
    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// A year failed to start after earlier years had finished.
    #[error("year {year} failed after {} completed year(s): {source}", .completed.len())]
    YearFailed {
        /// The year that failed.
        year: i32,
        /// Summaries of the years finished before it.
        completed: Vec<RunSummary>,
        /// Why the year failed.
        #[source]
        source: Box<EngineError>,
    },
}

/// Outcome counters for one year's pass.
///
/// `total_buckets` is fixed when the pass starts; the other counters grow
/// as buckets resolve. Buckets that failed or were never attempted (after
/// cancellation) are [`outstanding`](Self::outstanding).
#[derive(Debug, Default)]
pub struct RunSummary {
    year: i32,
    total_buckets: usize,
    downloaded_now: AtomicUsize,
    already_valid: AtomicUsize,
    failed: AtomicUsize,
}

impl RunSummary {
    /// Creates an empty summary for `total_buckets` buckets.
    #[must_use]
    pub fn new(year: i32, total_buckets: usize) -> Self {
        Self {
            year,
            total_buckets,
            ..Self::default()
        }
    }

    /// The year covered.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Buckets in the year.
    #[must_use]
    pub fn total_buckets(&self) -> usize {
        self.total_buckets
    }

    /// Buckets fetched during this pass.
    #[must_use]
    pub fn downloaded_now(&self) -> usize {
        self.downloaded_now.load(Ordering::SeqCst)
    }

    /// Buckets already valid on disk.
    #[must_use]
    pub fn already_valid(&self) -> usize {
        self.already_valid.load(Ordering::SeqCst)
    }

    /// Buckets whose fetch failed during this pass.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Buckets without a valid artifact after the pass.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.total_buckets
            .saturating_sub(self.downloaded_now() + self.already_valid())
    }

    /// True when every bucket has a valid artifact.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outstanding() == 0
    }

    fn increment_downloaded(&self) {
        self.downloaded_now.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_already_valid(&self) {
        self.already_valid.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: total {}, downloaded {}, already present {}, failed {}",
            self.year,
            self.total_buckets,
            self.downloaded_now(),
            self.already_valid(),
            self.outstanding()
        )
    }
}

/// How a single bucket resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketOutcome {
    AlreadyValid,
    Downloaded,
    Failed,
}

/// Drives year-level passes over the archive.
pub struct DownloadOrchestrator {
    layout: ArtifactLayout,
    fetcher: Arc<dyn Fetcher>,
    integrity: IntegrityChecker,
    sink: Arc<dyn EventSink>,
    max_attempts: u32,
    concurrency: usize,
}

impl fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("layout", &self.layout)
            .field("integrity", &self.integrity)
            .field("max_attempts", &self.max_attempts)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    /// Creates an orchestrator around an arbitrary [`Fetcher`].
    ///
    /// Defaults: `max_attempts = 3`, `concurrency = 1`, events to `tracing`.
    #[must_use]
    pub fn new(
        layout: ArtifactLayout,
        fetcher: Arc<dyn Fetcher>,
        integrity: IntegrityChecker,
    ) -> Self {
        Self {
            layout,
            fetcher,
            integrity,
            sink: Arc::new(TracingSink),
            max_attempts: DEFAULT_MAX_RETRIES,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Builds the HTTP-backed pipeline described by `config`, reporting to `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &FetchConfig) -> Result<Self, EngineError> {
        Self::from_config_with_sink(config, Arc::new(TracingSink))
    }

    /// Like [`from_config`](Self::from_config) with a custom event sink.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    #[instrument(level = "debug", skip(config, sink))]
    pub fn from_config_with_sink(
        config: &FetchConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let client = HttpClient::with_timeouts(config.connect_timeout, config.request_timeout)
            .map_err(EngineError::Client)?;
        let integrity = IntegrityChecker::new(config.integrity_mode, Arc::clone(&sink));
        let fetcher = RetryingFetcher::new(
            client,
            RetryPolicy::new(config.transport_backoff, config.integrity_backoff),
            integrity.clone(),
            Arc::clone(&sink),
        );

        debug!(
            service_base = %config.service_base,
            base_dir = %config.base_dir.display(),
            max_attempts = config.max_attempts,
            concurrency = config.concurrency,
            integrity = %config.integrity_mode,
            "creating orchestrator"
        );

        Self::new(
            ArtifactLayout::new(config.service_base.as_str(), config.base_dir.clone()),
            Arc::new(fetcher),
            integrity,
        )
        .with_sink(sink)
        .with_max_attempts(config.max_attempts)
        .with_concurrency(config.concurrency)
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the attempt budget passed to every fetch (minimum 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets how many buckets may resolve at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] outside
    /// `MIN_CONCURRENCY..=MAX_CONCURRENCY`.
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    /// The artifact layout.
    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// The attempt budget per artifact.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The configured concurrency.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Ensures every bucket of `year` has a valid local artifact.
    ///
    /// Individual bucket failures never fail the run; they show up as
    /// [`RunSummary::outstanding`]. Cancelling `cancel` stops scheduling new
    /// buckets and aborts in-flight fetches.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Range`] for an invalid year and
    /// [`EngineError::OutputDir`] if the year directory cannot be created,
    /// both before any network activity.
    #[instrument(skip(self, cancel), fields(base_dir = %self.layout.base_dir().display()))]
    pub async fn run_year(
        &self,
        year: i32,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let range = HourlyRange::for_year(year)?;
        let year_dir = self.layout.year_dir(year);
        tokio::fs::create_dir_all(&year_dir)
            .await
            .map_err(|source| EngineError::OutputDir {
                path: year_dir.clone(),
                source,
            })?;

        let summary = RunSummary::new(year, range.len());
        self.sink.emit(&FetchEvent::YearStarted {
            year,
            dir: &year_dir,
            total: summary.total_buckets(),
        });

        stream::iter(range.iter())
            .take_while(|_| std::future::ready(!cancel.is_cancelled()))
            .for_each_concurrent(self.concurrency, |bucket| {
                let summary = &summary;
                async move {
                    match self.resolve_bucket(&bucket, cancel).await {
                        BucketOutcome::AlreadyValid => summary.increment_already_valid(),
                        BucketOutcome::Downloaded => summary.increment_downloaded(),
                        BucketOutcome::Failed => summary.increment_failed(),
                    }
                }
            })
            .await;

        self.sink.emit(&FetchEvent::YearFinished { summary: &summary });
        Ok(summary)
    }

    /// Runs [`run_year`](Self::run_year) for each year in order.
    ///
    /// Stops early, returning the summaries so far, once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Stops at the first failing year; no later year is started. If the
    /// first year fails its [`EngineError`] is returned as is, otherwise it
    /// is wrapped in [`EngineError::YearFailed`] together with the
    /// summaries of the years already finished.
    pub async fn run_years(
        &self,
        years: &[i32],
        cancel: &CancellationToken,
    ) -> Result<Vec<RunSummary>, EngineError> {
        let mut summaries = Vec::with_capacity(years.len());
        for &year in years {
            if cancel.is_cancelled() {
                debug!(year, "cancelled, not starting year");
                break;
            }
            match self.run_year(year, cancel).await {
                Ok(summary) => summaries.push(summary),
                Err(error) if summaries.is_empty() => return Err(error),
                Err(error) => {
                    return Err(EngineError::YearFailed {
                        year,
                        completed: summaries,
                        source: Box::new(error),
                    });
                }
            }
        }
        Ok(summaries)
    }

    async fn resolve_bucket(&self, bucket: &TimeBucket, cancel: &CancellationToken) -> BucketOutcome {
        let ArtifactRef {
            remote_url,
            local_path,
        } = self.layout.artifact_ref(bucket);

        match tokio::fs::try_exists(&local_path).await {
            Ok(false) => {}
            Ok(true) | Err(_) => match self.integrity.inspect(&local_path).await {
                Ok(()) => {
                    self.sink.emit(&FetchEvent::AlreadyValid { path: &local_path });
                    return BucketOutcome::AlreadyValid;
                }
                Err(violation) => {
                    self.sink.emit(&FetchEvent::CorruptOnDisk {
                        path: &local_path,
                        violation: &violation,
                    });
                    if let Err(error) = remove_if_exists(&local_path).await {
                        self.sink.emit(&FetchEvent::RemoveFailed {
                            path: &local_path,
                            error: &error,
                        });
                        return BucketOutcome::Failed;
                    }
                }
            },
        }

        let request = FetchRequest {
            url: &remote_url,
            dest: &local_path,
            max_attempts: self.max_attempts,
        };
        match self.fetcher.fetch(&request, cancel).await {
            Ok(_) => BucketOutcome::Downloaded,
            Err(failed) => {
                debug!(bucket = %bucket, error = %failed, "bucket left outstanding");
                BucketOutcome::Failed
            }
        }
    }
}
