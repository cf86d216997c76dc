//! Config file loading and merging with CLI flags.
//!
//! Priority: CLI flag > config file > built-in default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use gharchive_core::{DEFAULT_YEARS, FetchConfig, IntegrityMode};

use crate::cli::Args;

/// TOML-style file configuration; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Base directory for per-year archive folders.
    pub base_dir: Option<PathBuf>,
    /// Archive service base URL.
    pub service_base: Option<String>,
    /// Attempts per archive.
    pub max_attempts: Option<u32>,
    /// Read timeout per request.
    pub request_timeout_secs: Option<u64>,
    /// Connect timeout per request.
    pub connect_timeout_secs: Option<u64>,
    /// Delay after a transport failure.
    pub backoff_ms: Option<u64>,
    /// Delay after an integrity rejection.
    pub integrity_backoff_ms: Option<u64>,
    /// Archives fetched at once.
    pub concurrency: Option<u8>,
    /// Integrity check mode.
    pub integrity: Option<IntegrityMode>,
}

/// Resolves the default config path.
///
/// 1. `$XDG_CONFIG_HOME/gharchive-fetcher/config.toml`
/// 2. `$HOME/.config/gharchive-fetcher/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("gharchive-fetcher")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("gharchive-fetcher")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the explicit config file, or the default one if it exists.
///
/// An explicit path must exist; a missing default file is not an error.
pub fn load_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return load_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "base_dir" => {
                cfg.base_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "service_base" => {
                cfg.service_base = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "max_attempts" => {
                let parsed = parse_integer_in(value, 1, 10).with_context(invalid)?;
                cfg.max_attempts = Some(u32::try_from(parsed)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs =
                    Some(parse_integer_in(value, 1, 3600).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs =
                    Some(parse_integer_in(value, 1, 3600).with_context(invalid)?);
            }
            "backoff_ms" => {
                cfg.backoff_ms = Some(parse_integer_in(value, 0, 600_000).with_context(invalid)?);
            }
            "integrity_backoff_ms" => {
                cfg.integrity_backoff_ms =
                    Some(parse_integer_in(value, 0, 600_000).with_context(invalid)?);
            }
            "concurrency" => {
                let parsed = parse_integer_in(value, 1, 32).with_context(invalid)?;
                cfg.concurrency = Some(u8::try_from(parsed)?);
            }
            "integrity" => {
                let label = parse_string_literal(value).with_context(invalid)?;
                let Some(mode) = IntegrityMode::parse(&label) else {
                    bail!(
                        "Invalid `integrity` value '{label}' on line {line_no}. Expected \"structural\" or \"prefix-decode\""
                    );
                };
                cfg.integrity = Some(mode);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_in(raw_value: &str, min: u64, max: u64) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < i128::from(min) || value > i128::from(max) {
        bail!("Expected range: {min}..={max}, got {value}");
    }
    Ok(u64::try_from(value)?)
}

/// Merges CLI flags over file values over defaults and validates the result.
pub fn resolve_fetch_config(args: &Args, file: Option<&FileConfig>) -> Result<FetchConfig> {
    let file = file.cloned().unwrap_or_default();
    let mut builder = FetchConfig::builder();

    if let Some(base_dir) = args.output_dir.clone().or(file.base_dir) {
        builder = builder.base_dir(base_dir);
    }
    if let Some(service_base) = args.service_base.clone().or(file.service_base) {
        builder = builder.service_base(service_base);
    }
    if let Some(max_attempts) = args.max_attempts.or(file.max_attempts) {
        builder = builder.max_attempts(max_attempts);
    }
    if let Some(secs) = args.timeout_secs.or(file.request_timeout_secs) {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = file.connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(ms) = args.backoff_ms.or(file.backoff_ms) {
        builder = builder.transport_backoff(Duration::from_millis(ms));
    }
    if let Some(ms) = file.integrity_backoff_ms {
        builder = builder.integrity_backoff(Duration::from_millis(ms));
    }
    if let Some(concurrency) = args.concurrency.or(file.concurrency) {
        builder = builder.concurrency(usize::from(concurrency));
    }
    let integrity = match args.integrity.as_deref() {
        Some(label) => IntegrityMode::parse(label),
        None => file.integrity,
    };
    if let Some(mode) = integrity {
        builder = builder.integrity_mode(mode);
    }

    let years = if args.years.is_empty() {
        DEFAULT_YEARS.to_vec()
    } else {
        args.years.clone()
    };

    builder
        .years(years)
        .build()
        .context("Invalid configuration")
}
