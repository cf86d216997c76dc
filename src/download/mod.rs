//! Resilient fetching of hourly archives.
//!
//! This module keeps a year's worth of hourly archives present and intact
//! on local storage, re-fetching only what is missing or corrupt.
//!
//! # Features
//!
//! - Streaming downloads (bodies are never buffered in memory)
//! - Structural gzip verification before an artifact is accepted
//! - Fixed-backoff retries for transport failures, immediate retries for
//!   rejected artifacts, early abort on local errors
//! - No partial or unverified file survives a failed fetch
//! - Cancellation through [`CancellationToken`](tokio_util::sync::CancellationToken)
//!
//! # Example
//!
//! ```no_run
//! use gharchive_core::FetchConfig;
//! use gharchive_core::download::DownloadOrchestrator;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FetchConfig::builder().base_dir("/data").years(vec![2021]).build()?;
//! let orchestrator = DownloadOrchestrator::from_config(&config)?;
//! let summaries = orchestrator.run_years(&config.years, &CancellationToken::new()).await?;
//! for summary in &summaries {
//!     println!("{summary}");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub(crate) mod constants;
mod engine;
mod error;
pub mod events;
mod fetch;
mod integrity;
mod retry;

pub use client::{HttpClient, remove_if_exists};
pub use constants::DEFAULT_SERVICE_BASE;
pub use engine::{DEFAULT_CONCURRENCY, DownloadOrchestrator, EngineError, RunSummary};
pub use error::DownloadError;
pub use events::{EventSink, FetchEvent, TracingSink};
pub use fetch::{FetchFailed, FetchRequest, Fetched, Fetcher, RetryingFetcher};
pub use integrity::{
    GZIP_MAGIC, IntegrityChecker, IntegrityMode, IntegrityViolation, MIN_ARCHIVE_SIZE,
};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};

// Note: no module-local Result aliases; signatures spell out
// `Result<T, DownloadError>` explicitly.
