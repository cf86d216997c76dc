//! GH Archive Fetcher Core Library
//!
//! Keeps a local mirror of the hourly GitHub event archives complete:
//! for each requested year it derives the 8760 (or 8784) hourly archive
//! URLs, checks what is already on disk, and fetches only what is missing
//! or corrupt.
//!
//! # Architecture
//!
//! - [`range`] - Hourly bucket enumeration and URL/path mapping
//! - [`download`] - Integrity checking, retrying fetches, year orchestration
//! - [`config`] - Immutable run configuration
//! - [`records`] - Repository record files consumed by downstream scoring

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod range;
pub mod records;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, DEFAULT_YEARS, FetchConfig, FetchConfigBuilder};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadError, DownloadOrchestrator, EngineError,
    EventSink, FetchEvent, FetchFailed, FetchRequest, Fetched, Fetcher, HttpClient,
    IntegrityChecker, IntegrityMode, RetryPolicy, RetryingFetcher, RunSummary, TracingSink,
};
pub use range::{ArtifactLayout, ArtifactRef, HourlyRange, RangeError, TimeBucket};
