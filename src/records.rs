//! Repository record files shared with the scraping and scoring stages.
//!
//! Those stages live outside this crate; they exchange tabular
//! [`RepoRecord`]s stored as JSON Lines, one file per category and year.
//! Like the archive fetcher, they skip any output that already exists
//! ([`materialize_if_absent`]), so reruns only compute what is missing.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Default scoring batch size.
pub const DEFAULT_SCORE_BATCH: usize = 100;

/// Errors reading or writing record files.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Filesystem failure.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line did not (de)serialize.
    #[error("malformed record in {path} at line {line}: {source}")]
    Json {
        /// The file involved.
        path: PathBuf,
        /// 1-indexed line number.
        line: usize,
        /// The serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The scorer returned the wrong number of scores.
    #[error("scorer returned {actual} scores for a batch of {expected}")]
    ScoreCount {
        /// Batch size.
        expected: usize,
        /// Scores returned.
        actual: usize,
    },
}

impl RecordError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One repository as produced by the scraping stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoRecord {
    /// `owner/name`.
    pub full_name: String,
    /// Owner login.
    pub owner: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Star count.
    #[serde(default)]
    pub stars: u64,
    /// Fork count.
    #[serde(default)]
    pub forks: u64,
    /// Primary language.
    #[serde(default)]
    pub language: Option<String>,
    /// Repository topics.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Creation timestamp as reported by the API.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last update timestamp.
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Last push timestamp.
    #[serde(default)]
    pub pushed_at: Option<String>,
    /// Category relevance score assigned by the scraper.
    #[serde(default)]
    pub score: u32,
}

/// A record with the score column appended by the scoring stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// The input record.
    #[serde(flatten)]
    pub record: RepoRecord,
    /// Derived score.
    pub derived_score: f64,
}

/// Batch scorer applied to record text.
pub trait Scorer {
    /// Returns exactly one score per input text.
    fn score_batch(&mut self, texts: &[&str]) -> Vec<f64>;
}

/// Outcome of [`materialize_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// The destination already existed; nothing was computed.
    Skipped,
    /// The destination was written.
    Written {
        /// Records written.
        rows: usize,
    },
}

/// Where record files live: `{root}/{category}/{year}.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scraped records for a category and year.
    #[must_use]
    pub fn records_path(&self, category: &str, year: i32) -> PathBuf {
        self.root.join(category).join(format!("{year}.jsonl"))
    }

    /// Scored sibling of [`records_path`](Self::records_path).
    #[must_use]
    pub fn scores_path(&self, category: &str, year: i32) -> PathBuf {
        self.root.join(category).join(format!("{year}_score.jsonl"))
    }
}

/// Writes the output of `produce` to `dest` unless `dest` already exists.
///
/// Output is written to a temporary sibling and renamed into place, so a
/// crash never leaves a half-written file that a rerun would skip.
///
/// # Errors
///
/// Returns [`RecordError`] if the producer fails or the file cannot be written.
#[instrument(skip(produce), fields(dest = %dest.display()))]
pub fn materialize_if_absent<T, F>(dest: &Path, produce: F) -> Result<Materialized, RecordError>
where
    T: Serialize,
    F: FnOnce() -> Result<Vec<T>, RecordError>,
{
    if dest.exists() {
        info!("output already exists, skipping");
        return Ok(Materialized::Skipped);
    }

    let rows = produce()?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| RecordError::io(parent, e))?;
    }

    let staging = staging_path(dest);
    if let Err(error) = write_json_lines(&staging, &rows) {
        let _ = fs::remove_file(&staging);
        return Err(error);
    }
    fs::rename(&staging, dest).map_err(|e| RecordError::io(dest, e))?;

    debug!(rows = rows.len(), "output written");
    Ok(Materialized::Written { rows: rows.len() })
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

fn write_json_lines<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), RecordError> {
    let file = File::create(path).map_err(|e| RecordError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for (index, row) in rows.iter().enumerate() {
        serde_json::to_writer(&mut writer, row).map_err(|source| RecordError::Json {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        writer.write_all(b"\n").map_err(|e| RecordError::io(path, e))?;
    }
    writer.flush().map_err(|e| RecordError::io(path, e))
}

/// Reads a JSON Lines record file. Blank lines are ignored.
///
/// # Errors
///
/// Returns [`RecordError`] if the file cannot be read or a line is malformed.
pub fn read_records<T>(path: &Path) -> Result<Vec<T>, RecordError>
where
    T: for<'de> Deserialize<'de>,
{
    let file = File::open(path).map_err(|e| RecordError::io(path, e))?;
    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| RecordError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|source| RecordError::Json {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Appends a derived score to every record, scoring `batch_size` at a time.
///
/// The scored text is the description; missing descriptions score as an
/// empty string.
///
/// # Errors
///
/// Returns [`RecordError::ScoreCount`] if the scorer's output length does
/// not match its input.
pub fn score_records<S: Scorer>(
    records: Vec<RepoRecord>,
    scorer: &mut S,
    batch_size: usize,
) -> Result<Vec<ScoredRecord>, RecordError> {
    let batch_size = batch_size.max(1);
    let mut scored = Vec::with_capacity(records.len());
    let mut pending = records.into_iter().peekable();

    while pending.peek().is_some() {
        let batch: Vec<RepoRecord> = pending.by_ref().take(batch_size).collect();
        let texts: Vec<&str> = batch
            .iter()
            .map(|r| r.description.as_deref().unwrap_or(""))
            .collect();
        let scores = scorer.score_batch(&texts);
        if scores.len() != batch.len() {
            return Err(RecordError::ScoreCount {
                expected: batch.len(),
                actual: scores.len(),
            });
        }
        scored.extend(
            batch
                .into_iter()
                .zip(scores)
                .map(|(record, derived_score)| ScoredRecord {
                    record,
                    derived_score,
                }),
        );
    }
    Ok(scored)
}
