//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Mirror hourly GitHub event archives to local storage.
///
/// For each year, every hourly archive that is missing or fails the
/// integrity check is downloaded; valid archives are left alone, so the
/// command can be rerun until the mirror is complete.
#[derive(Parser, Debug)]
#[command(name = "gharchive-fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Years to fetch, processed in order (default: 2019-2024)
    #[arg(value_parser = clap::value_parser!(i32).range(1970..=9999))]
    pub years: Vec<i32>,

    /// Base directory; archives land in <DIR>/<year>/
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Archive service base URL
    #[arg(long, value_name = "URL")]
    pub service_base: Option<String>,

    /// Maximum attempts per archive (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Read timeout per request in seconds (1-3600)
    #[arg(short = 't', long = "timeout", value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout_secs: Option<u64>,

    /// Delay after a transport failure in milliseconds (max 600000)
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub backoff_ms: Option<u64>,

    /// Archives fetched at once (1-32); 1 keeps strict hourly order
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Integrity check mode
    #[arg(long, value_parser = ["structural", "prefix-decode"])]
    pub integrity: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/gharchive-fetcher/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
