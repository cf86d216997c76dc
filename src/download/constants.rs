//! Constants for the download module (timeouts, backoff, chunking).

use std::time::Duration;

/// Default HTTP connect timeout (60 seconds, same as the read timeout).
pub const CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default HTTP read timeout (60 seconds).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Default delay before retrying after a transport failure.
pub const TRANSPORT_BACKOFF: Duration = Duration::from_secs(2);

/// Default delay before retrying after an integrity rejection (none).
pub const INTEGRITY_BACKOFF: Duration = Duration::ZERO;

/// Write buffer size used while streaming a response body to disk.
pub const STREAM_CHUNK_SIZE: usize = 8192;

/// Public archive service the hourly files are fetched from.
pub const DEFAULT_SERVICE_BASE: &str = "https://data.gharchive.org";
