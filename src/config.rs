//! Immutable run configuration.
//!
//! A [`FetchConfig`] is built once (by the CLI from flags, config file and
//! defaults) and handed by reference to every component. Nothing reads
//! configuration from ambient state after that.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::download::IntegrityMode;
use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_SERVICE_BASE, INTEGRITY_BACKOFF, READ_TIMEOUT_SECS,
    TRANSPORT_BACKOFF,
};
use crate::download::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use crate::range::HourlyRange;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 32;

/// Largest accepted attempt budget.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Largest accepted timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Largest accepted backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Years fetched when none are requested.
pub const DEFAULT_YEARS: [i32; 6] = [2019, 2020, 2021, 2022, 2023, 2024];

/// Invalid configuration, detected before any network activity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The service base is not an absolute http(s) URL.
    #[error("invalid service base URL '{value}': {reason}")]
    InvalidServiceBase {
        /// The rejected value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The base directory is empty.
    #[error("base directory must not be empty")]
    EmptyBaseDir,

    /// A year cannot be enumerated.
    #[error("invalid year {year}")]
    InvalidYear {
        /// The rejected year.
        year: i32,
    },

    /// A numeric setting is out of range.
    #[error("invalid value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// The accepted range.
        expected: String,
    },
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Archive service the hourly files are fetched from.
    pub service_base: Url,
    /// Directory holding one subdirectory per year.
    pub base_dir: PathBuf,
    /// Years to process, in order.
    pub years: Vec<i32>,
    /// Attempt budget per artifact.
    pub max_attempts: u32,
    /// Read timeout per request.
    pub request_timeout: Duration,
    /// Connect timeout per request.
    pub connect_timeout: Duration,
    /// Delay after a transport failure.
    pub transport_backoff: Duration,
    /// Delay after an integrity rejection.
    pub integrity_backoff: Duration,
    /// Buckets resolved at once.
    pub concurrency: usize,
    /// Integrity check thoroughness.
    pub integrity_mode: IntegrityMode,
}

impl FetchConfig {
    /// Starts a builder seeded with defaults.
    #[must_use]
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::default()
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_base(&self.service_base)?;
        if self.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBaseDir);
        }
        for &year in &self.years {
            HourlyRange::for_year(year).map_err(|_| ConfigError::InvalidYear { year })?;
        }
        check_range(
            "max_attempts",
            u64::from(self.max_attempts),
            1,
            u64::from(MAX_ATTEMPTS_LIMIT),
        )?;
        check_range(
            "concurrency",
            self.concurrency as u64,
            MIN_CONCURRENCY as u64,
            MAX_CONCURRENCY as u64,
        )?;
        check_duration("request_timeout", self.request_timeout, Duration::from_secs(1), MAX_TIMEOUT)?;
        check_duration("connect_timeout", self.connect_timeout, Duration::from_secs(1), MAX_TIMEOUT)?;
        check_duration("transport_backoff", self.transport_backoff, Duration::ZERO, MAX_BACKOFF)?;
        check_duration("integrity_backoff", self.integrity_backoff, Duration::ZERO, MAX_BACKOFF)?;
        Ok(())
    }
}

fn validate_service_base(url: &Url) -> Result<(), ConfigError> {
    let reason = if !matches!(url.scheme(), "http" | "https") {
        Some("scheme must be http or https")
    } else if url.host_str().is_none() {
        Some("missing host")
    } else if url.query().is_some() || url.fragment().is_some() {
        Some("query and fragment are not allowed")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidServiceBase {
            value: url.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected: format!("{min}..={max}"),
        })
    }
}

fn check_duration(
    field: &'static str,
    value: Duration,
    min: Duration,
    max: Duration,
) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: format!("{value:?}"),
            expected: format!("{min:?}..={max:?}"),
        })
    }
}

/// Builder for [`FetchConfig`].
#[derive(Debug, Clone)]
pub struct FetchConfigBuilder {
    service_base: String,
    base_dir: PathBuf,
    years: Vec<i32>,
    max_attempts: u32,
    request_timeout: Duration,
    connect_timeout: Duration,
    transport_backoff: Duration,
    integrity_backoff: Duration,
    concurrency: usize,
    integrity_mode: IntegrityMode,
}

impl Default for FetchConfigBuilder {
    fn default() -> Self {
        Self {
            service_base: DEFAULT_SERVICE_BASE.to_string(),
            base_dir: PathBuf::from("gh_data"),
            years: DEFAULT_YEARS.to_vec(),
            max_attempts: DEFAULT_MAX_RETRIES,
            request_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            transport_backoff: TRANSPORT_BACKOFF,
            integrity_backoff: INTEGRITY_BACKOFF,
            concurrency: DEFAULT_CONCURRENCY,
            integrity_mode: IntegrityMode::default(),
        }
    }
}

impl FetchConfigBuilder {
    /// Archive service base URL.
    #[must_use]
    pub fn service_base(mut self, value: impl Into<String>) -> Self {
        self.service_base = value.into();
        self
    }

    /// Local base directory.
    #[must_use]
    pub fn base_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.base_dir = value.into();
        self
    }

    /// Years to process.
    #[must_use]
    pub fn years(mut self, value: impl Into<Vec<i32>>) -> Self {
        self.years = value.into();
        self
    }

    /// Attempt budget per artifact.
    #[must_use]
    pub fn max_attempts(mut self, value: u32) -> Self {
        self.max_attempts = value;
        self
    }

    /// Read timeout per request.
    #[must_use]
    pub fn request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = value;
        self
    }

    /// Connect timeout per request.
    #[must_use]
    pub fn connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Delay after a transport failure.
    #[must_use]
    pub fn transport_backoff(mut self, value: Duration) -> Self {
        self.transport_backoff = value;
        self
    }

    /// Delay after an integrity rejection.
    #[must_use]
    pub fn integrity_backoff(mut self, value: Duration) -> Self {
        self.integrity_backoff = value;
        self
    }

    /// Buckets resolved at once.
    #[must_use]
    pub fn concurrency(mut self, value: usize) -> Self {
        self.concurrency = value;
        self
    }

    /// Integrity check thoroughness.
    #[must_use]
    pub fn integrity_mode(mut self, value: IntegrityMode) -> Self {
        self.integrity_mode = value;
        self
    }

    /// Parses and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for any invalid field.
    pub fn build(self) -> Result<FetchConfig, ConfigError> {
        let service_base =
            Url::parse(&self.service_base).map_err(|e| ConfigError::InvalidServiceBase {
                value: self.service_base.clone(),
                reason: e.to_string(),
            })?;
        let config = FetchConfig {
            service_base,
            base_dir: self.base_dir,
            years: self.years,
            max_attempts: self.max_attempts,
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            transport_backoff: self.transport_backoff,
            integrity_backoff: self.integrity_backoff,
            concurrency: self.concurrency,
            integrity_mode: self.integrity_mode,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FetchConfig::builder().build().unwrap();
        assert_eq!(config.service_base.as_str(), "https://data.gharchive.org/");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.transport_backoff, Duration::from_secs(2));
        assert_eq!(config.integrity_backoff, Duration::ZERO);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.years, DEFAULT_YEARS.to_vec());
        assert_eq!(config.integrity_mode, IntegrityMode::Structural);
    }

    #[test]
    fn test_unparseable_service_base_rejected() {
        let err = FetchConfig::builder()
            .service_base("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServiceBase { .. }));
    }

    #[test]
    fn test_non_http_service_base_rejected() {
        let err = FetchConfig::builder()
            .service_base("ftp://data.gharchive.org")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("scheme"), "{err}");
    }

    #[test]
    fn test_empty_base_dir_rejected() {
        let err = FetchConfig::builder().base_dir("").build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyBaseDir);
    }

    #[test]
    fn test_invalid_year_rejected() {
        let err = FetchConfig::builder()
            .years(vec![2021, i32::MAX])
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidYear { year: i32::MAX });
    }

    #[test]
    fn test_attempt_budget_bounds() {
        assert!(FetchConfig::builder().max_attempts(0).build().is_err());
        assert!(FetchConfig::builder().max_attempts(10).build().is_ok());
        let err = FetchConfig::builder().max_attempts(11).build().unwrap_err();
        assert!(err.to_string().contains("max_attempts"), "{err}");
    }

    #[test]
    fn test_concurrency_bounds() {
        assert!(FetchConfig::builder().concurrency(0).build().is_err());
        assert!(FetchConfig::builder().concurrency(MAX_CONCURRENCY).build().is_ok());
        assert!(FetchConfig::builder().concurrency(MAX_CONCURRENCY + 1).build().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = FetchConfig::builder()
            .request_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("request_timeout"), "{err}");
    }
}
