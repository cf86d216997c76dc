//! Shared helpers for integration tests: gzip fixtures, an event recorder
//! and an in-process fetcher that never touches the network.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use gharchive_core::{
    DownloadError, EventSink, FetchEvent, FetchFailed, FetchRequest, Fetched, Fetcher,
};
use tokio_util::sync::CancellationToken;

/// Gzip-compresses `payload`.
pub fn gzip(payload: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

/// A small but real hourly archive.
pub fn sample_archive() -> Vec<u8> {
    gzip(br#"{"id":"1","type":"PushEvent","repo":{"name":"octo/repo"}}
{"id":"2","type":"WatchEvent","repo":{"name":"octo/other"}}
"#)
}

/// Gzip header and trailer around a body no inflater accepts.
pub fn garbled_archive() -> Vec<u8> {
    let real = gzip(&vec![b'a'; 4096]);
    let mut bytes = real[..10].to_vec();
    bytes.extend_from_slice(&[0xff; 64]);
    bytes.extend_from_slice(&real[real.len() - 8..]);
    bytes
}

/// Records a short label for every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    labels: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.labels().iter().filter(|l| l.as_str() == label).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &FetchEvent<'_>) {
        let label = match event {
            FetchEvent::YearStarted { year, .. } => format!("year_started:{year}"),
            FetchEvent::YearFinished { summary } => format!("year_finished:{}", summary.year()),
            FetchEvent::AlreadyValid { .. } => "already_valid".to_string(),
            FetchEvent::CorruptOnDisk { .. } => "corrupt_on_disk".to_string(),
            FetchEvent::RemoveFailed { .. } => "remove_failed".to_string(),
            FetchEvent::AttemptStarted { attempt, .. } => format!("attempt:{attempt}"),
            FetchEvent::Verified { .. } => "verified".to_string(),
            FetchEvent::IntegrityRejected { .. } => "integrity_rejected".to_string(),
            FetchEvent::TransportFailed { .. } => "transport_failed".to_string(),
            FetchEvent::BackingOff { .. } => "backing_off".to_string(),
            FetchEvent::Aborted { .. } => "aborted".to_string(),
            FetchEvent::Exhausted { .. } => "exhausted".to_string(),
            FetchEvent::IntegrityIoError { .. } => "integrity_io_error".to_string(),
        };
        self.labels.lock().unwrap().push(label);
    }
}

/// One call observed by [`StubFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubCall {
    pub url: String,
    pub max_attempts: u32,
}

/// Writes [`sample_archive`] to the destination, or fails for listed URL suffixes.
#[derive(Default)]
pub struct StubFetcher {
    calls: Mutex<Vec<StubCall>>,
    failing: HashSet<String>,
}

impl StubFetcher {
    pub fn failing_for(suffixes: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: suffixes.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest<'_>,
        _cancel: &CancellationToken,
    ) -> Result<Fetched, FetchFailed> {
        self.calls.lock().unwrap().push(StubCall {
            url: request.url.to_string(),
            max_attempts: request.max_attempts,
        });

        if self.failing.iter().any(|s| request.url.ends_with(s.as_str())) {
            return Err(FetchFailed::Exhausted {
                url: request.url.to_string(),
                attempts: request.max_attempts,
                last_error: DownloadError::http_status(request.url, 503),
            });
        }

        let body = sample_archive();
        std::fs::write(request.dest, &body).unwrap();
        Ok(Fetched {
            bytes: body.len() as u64,
            attempts: 1,
        })
    }
}

/// Writes a valid archive at `path`.
pub fn write_valid(path: &Path) {
    std::fs::write(path, sample_archive()).unwrap();
}

/// Number of regular files directly under `dir`.
pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
        .count()
}
