//! Hourly bucket enumeration for one calendar year.
//!
//! A [`HourlyRange`] yields every [`TimeBucket`] in `[Jan 1 00:00 Y, Jan 1 00:00 Y+1)`
//! in strictly increasing order. An [`ArtifactLayout`] maps each bucket to the
//! remote archive URL and the local path it is stored under.
//!
//! # Example
//!
//! ```
//! use gharchive_core::range::{ArtifactLayout, HourlyRange};
//!
//! let range = HourlyRange::for_year(2021).unwrap();
//! assert_eq!(range.len(), 8760);
//!
//! let layout = ArtifactLayout::new("https://data.gharchive.org", "/data");
//! let first = range.iter().next().unwrap();
//! let artifact = layout.artifact_ref(&first);
//! assert_eq!(artifact.remote_url, "https://data.gharchive.org/2021-01-01-0.json.gz");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use thiserror::Error;

/// File extension of every hourly archive.
const ARCHIVE_SUFFIX: &str = ".json.gz";

/// Errors raised while building a range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// The year cannot be represented as a full calendar year.
    #[error("invalid year {year}: outside the supported calendar")]
    InvalidYear {
        /// The rejected year.
        year: i32,
    },

    /// A zero-hour step would never advance.
    #[error("invalid step: must be at least one hour")]
    InvalidStep,
}

/// One hour-resolution slot within a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket {
    start: NaiveDateTime,
}

impl TimeBucket {
    /// Builds a bucket from calendar components, or `None` if they are not a real hour.
    #[must_use]
    pub fn new(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .map(|start| Self { start })
    }

    /// Calendar year.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.start.year()
    }

    /// Month, 1-12.
    #[must_use]
    pub fn month(&self) -> u32 {
        self.start.month()
    }

    /// Day of month, 1-31.
    #[must_use]
    pub fn day(&self) -> u32 {
        self.start.day()
    }

    /// Hour of day, 0-23.
    #[must_use]
    pub fn hour(&self) -> u32 {
        self.start.hour()
    }

    /// Archive file name: `{YYYY-MM}-{DD}-{H}.json.gz`, hour unpadded.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}-{}{ARCHIVE_SUFFIX}",
            self.year(),
            self.month(),
            self.day(),
            self.hour()
        )
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format("%Y-%m-%dT%H:00"))
    }
}

/// Lazy, restartable sequence of buckets covering one calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlyRange {
    year: i32,
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: TimeDelta,
}

impl HourlyRange {
    /// Range with one bucket per hour.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::InvalidYear`] if the year or its successor is
    /// outside the representable calendar.
    pub fn for_year(year: i32) -> Result<Self, RangeError> {
        Self::with_step(year, 1)
    }

    /// Range stepping by `step_hours` hours.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::InvalidStep`] for a zero step and
    /// [`RangeError::InvalidYear`] for an unrepresentable year.
    pub fn with_step(year: i32, step_hours: u32) -> Result<Self, RangeError> {
        if step_hours == 0 {
            return Err(RangeError::InvalidStep);
        }
        let start = year_start(year).ok_or(RangeError::InvalidYear { year })?;
        let end = year
            .checked_add(1)
            .and_then(year_start)
            .ok_or(RangeError::InvalidYear { year })?;
        Ok(Self {
            year,
            start,
            end,
            step: TimeDelta::hours(i64::from(step_hours)),
        })
    }

    /// The year covered.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Number of buckets, derived from calendar arithmetic.
    #[must_use]
    pub fn len(&self) -> usize {
        let span = (self.end - self.start).num_hours();
        let step = self.step.num_hours();
        usize::try_from((span + step - 1) / step).unwrap_or(0)
    }

    /// Always false for a valid range; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh iterator from the first hour of the year.
    #[must_use]
    pub fn iter(&self) -> HourlyIter {
        HourlyIter {
            next: Some(self.start),
            end: self.end,
            step: self.step,
        }
    }
}

impl IntoIterator for &HourlyRange {
    type Item = TimeBucket;
    type IntoIter = HourlyIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the buckets of an [`HourlyRange`].
#[derive(Debug, Clone)]
pub struct HourlyIter {
    next: Option<NaiveDateTime>,
    end: NaiveDateTime,
    step: TimeDelta,
}

impl Iterator for HourlyIter {
    type Item = TimeBucket;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.filter(|at| *at < self.end)?;
        self.next = current.checked_add_signed(self.step);
        Some(TimeBucket { start: current })
    }
}

fn year_start(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1).and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Remote URL and local path for one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Where the archive is fetched from.
    pub remote_url: String,
    /// Where the archive is stored.
    pub local_path: PathBuf,
}

/// Maps buckets to artifact locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    service_base: String,
    base_dir: PathBuf,
}

impl ArtifactLayout {
    /// Creates a layout. Trailing slashes on `service_base` are dropped.
    pub fn new(service_base: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        let service_base = service_base.into().trim_end_matches('/').to_string();
        Self {
            service_base,
            base_dir: base_dir.into(),
        }
    }

    /// The normalized service base URL.
    #[must_use]
    pub fn service_base(&self) -> &str {
        &self.service_base
    }

    /// The configured base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Per-year storage directory: `{base_dir}/{year}`.
    #[must_use]
    pub fn year_dir(&self, year: i32) -> PathBuf {
        self.base_dir.join(year.to_string())
    }

    /// Resolves the artifact for a bucket.
    #[must_use]
    pub fn artifact_ref(&self, bucket: &TimeBucket) -> ArtifactRef {
        let file_name = bucket.file_name();
        ArtifactRef {
            remote_url: format!("{}/{file_name}", self.service_base),
            local_path: self.year_dir(bucket.year()).join(file_name),
        }
    }
}
