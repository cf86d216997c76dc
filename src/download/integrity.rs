//! Structural validation of downloaded gzip archives.
//!
//! The default [`IntegrityMode::Structural`] check reads at most ten bytes:
//! the two-byte magic and the eight-byte trailer. A file truncated in the
//! middle can still pass it. [`IntegrityMode::PrefixDecode`] additionally
//! inflates a bounded prefix of the stream, which catches archives whose
//! compressed body ends early or is garbled near the start. Both modes cost
//! the same regardless of the archive's total size.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

use super::events::{EventSink, FetchEvent, TracingSink};

/// Gzip member magic number.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Smallest possible gzip member: 10-byte header + 8-byte trailer.
pub const MIN_ARCHIVE_SIZE: u64 = 18;

/// Length of the CRC32 + ISIZE trailer.
const TRAILER_LEN: usize = 8;

/// Decompressed bytes inspected by [`IntegrityMode::PrefixDecode`].
const PREFIX_DECODE_LIMIT: u64 = 64 * 1024;

/// Why an artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    /// Nothing exists at the path.
    #[error("file is missing")]
    Missing,

    /// Shorter than a minimal gzip member.
    #[error("file is {size} bytes, minimum is {MIN_ARCHIVE_SIZE}")]
    TooSmall {
        /// Observed size.
        size: u64,
    },

    /// First two bytes are not the gzip magic.
    #[error("bad magic number")]
    BadMagic,

    /// The final eight bytes could not be read in full.
    #[error("trailer unreadable")]
    MissingTrailer,

    /// Opening, seeking or reading failed.
    #[error("unreadable: {reason}")]
    Unreadable {
        /// The underlying IO error message.
        reason: String,
    },

    /// The inflated prefix did not decode.
    #[error("corrupt gzip stream: {reason}")]
    CorruptStream {
        /// The decoder's error message.
        reason: String,
    },
}

impl IntegrityViolation {
    fn unreadable(error: &io::Error) -> Self {
        if error.kind() == io::ErrorKind::NotFound {
            Self::Missing
        } else {
            Self::Unreadable {
                reason: error.to_string(),
            }
        }
    }
}

/// How thoroughly artifacts are validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegrityMode {
    /// Size, magic and trailer only.
    #[default]
    Structural,
    /// Structural checks plus inflating a bounded prefix.
    PrefixDecode,
}

impl IntegrityMode {
    /// Stable label used in config files and CLI flags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::PrefixDecode => "prefix-decode",
        }
    }

    /// Parses a label produced by [`as_str`](Self::as_str).
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "structural" => Some(Self::Structural),
            "prefix-decode" => Some(Self::PrefixDecode),
            _ => None,
        }
    }
}

impl fmt::Display for IntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acceptance gate for artifacts on disk.
#[derive(Clone)]
pub struct IntegrityChecker {
    mode: IntegrityMode,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for IntegrityChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityChecker")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::new(IntegrityMode::default(), Arc::new(TracingSink))
    }
}

impl IntegrityChecker {
    /// Creates a checker reporting filesystem errors to `sink`.
    #[must_use]
    pub fn new(mode: IntegrityMode, sink: Arc<dyn EventSink>) -> Self {
        Self { mode, sink }
    }

    /// The configured mode.
    #[must_use]
    pub fn mode(&self) -> IntegrityMode {
        self.mode
    }

    /// Returns true when the artifact at `path` is acceptable.
    ///
    /// Never fails: filesystem errors, a missing file included, count as
    /// invalid and are reported to the event sink.
    pub async fn check(&self, path: &Path) -> bool {
        match self.inspect(path).await {
            Ok(()) => true,
            Err(violation) => {
                if matches!(
                    violation,
                    IntegrityViolation::Missing | IntegrityViolation::Unreadable { .. }
                ) {
                    self.sink.emit(&FetchEvent::IntegrityIoError {
                        path,
                        violation: &violation,
                    });
                }
                false
            }
        }
    }

    /// Validates the artifact at `path`, returning the reason on rejection.
    ///
    /// # Errors
    ///
    /// Returns the first [`IntegrityViolation`] found.
    #[instrument(level = "debug", skip(self), fields(path = %path.display(), mode = %self.mode))]
    pub async fn inspect(&self, path: &Path) -> Result<(), IntegrityViolation> {
        inspect_structure(path).await?;
        if self.mode == IntegrityMode::PrefixDecode {
            decode_prefix(path.to_path_buf()).await?;
        }
        Ok(())
    }
}

async fn inspect_structure(path: &Path) -> Result<(), IntegrityViolation> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|e| IntegrityViolation::unreadable(&e))?
        .len();
    if size < MIN_ARCHIVE_SIZE {
        return Err(IntegrityViolation::TooSmall { size });
    }

    let mut file = File::open(path)
        .await
        .map_err(|e| IntegrityViolation::unreadable(&e))?;

    let mut magic = [0u8; 2];
    file.read_exact(&mut magic)
        .await
        .map_err(|e| IntegrityViolation::unreadable(&e))?;
    if magic != GZIP_MAGIC {
        return Err(IntegrityViolation::BadMagic);
    }

    file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))
        .await
        .map_err(|e| IntegrityViolation::unreadable(&e))?;
    let mut trailer = [0u8; TRAILER_LEN];
    match file.read_exact(&mut trailer).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(IntegrityViolation::MissingTrailer)
        }
        Err(e) => Err(IntegrityViolation::unreadable(&e)),
    }
}

async fn decode_prefix(path: PathBuf) -> Result<(), IntegrityViolation> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path).map_err(|e| IntegrityViolation::unreadable(&e))?;
        let decoder = GzDecoder::new(io::BufReader::new(file));
        let mut prefix = io::Read::take(decoder, PREFIX_DECODE_LIMIT);
        io::copy(&mut prefix, &mut io::sink())
            .map(|_| ())
            .map_err(|e| IntegrityViolation::CorruptStream {
                reason: e.to_string(),
            })
    })
    .await
    .map_err(|e| IntegrityViolation::Unreadable {
        reason: e.to_string(),
    })?
}
