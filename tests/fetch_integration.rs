//! Integration tests for single-artifact fetching against a mock archive service.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use gharchive_core::download::IntegrityViolation;
use gharchive_core::{
    DownloadError, EventSink, FetchFailed, FetchRequest, Fetcher, HttpClient, IntegrityChecker,
    IntegrityMode, RetryPolicy, RetryingFetcher,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{RecordingSink, garbled_archive, sample_archive};

const ARCHIVE: &str = "/2021-03-15-7.json.gz";

fn fetcher_with(
    policy: RetryPolicy,
    mode: IntegrityMode,
    sink: Arc<RecordingSink>,
) -> RetryingFetcher {
    let sink: Arc<dyn EventSink> = sink;
    RetryingFetcher::new(
        HttpClient::new(),
        policy,
        IntegrityChecker::new(mode, Arc::clone(&sink)),
        sink,
    )
}

fn fetcher_with_client(client: HttpClient, sink: Arc<RecordingSink>) -> RetryingFetcher {
    let sink: Arc<dyn EventSink> = sink;
    RetryingFetcher::new(
        client,
        RetryPolicy::immediate(),
        IntegrityChecker::new(IntegrityMode::Structural, Arc::clone(&sink)),
        sink,
    )
}

/// What a [`spawn_short_body_server`] connection does after the partial body.
#[derive(Clone, Copy)]
enum AfterBody {
    Close,
    Stall,
}

/// Serves a 200 whose `Content-Length` promises more than `body`, then
/// closes or stalls. Returns the archive URL.
async fn spawn_short_body_server(body: Vec<u8>, after: AfterBody) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/gzip\r\nContent-Length: {}\r\n\r\n",
                    body.len() + 4096
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.flush().await;
                if let AfterBody::Stall = after {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            });
        }
    });
    format!("http://{addr}{ARCHIVE}")
}

fn fetcher(sink: Arc<RecordingSink>) -> RetryingFetcher {
    fetcher_with(RetryPolicy::immediate(), IntegrityMode::Structural, sink)
}

async fn serve(server: &MockServer, status: u16, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(ARCHIVE))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_valid_archive_accepted_on_first_attempt() {
    let server = MockServer::start().await;
    serve(&server, 200, sample_archive()).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("2021-03-15-7.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());
    let sink = Arc::new(RecordingSink::default());

    let fetched = fetcher(sink.clone())
        .fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(fetched.attempts, 1);
    assert_eq!(fetched.bytes, sample_archive().len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), sample_archive());
    assert_eq!(sink.labels(), vec!["attempt:1", "verified"]);
}

#[tokio::test]
async fn test_server_error_then_success_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, 200, sample_archive()).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());
    let sink = Arc::new(RecordingSink::default());

    let fetched = fetcher(sink.clone())
        .fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(fetched.attempts, 2);
    assert!(dest.exists());
    assert_eq!(sink.count("transport_failed"), 1);
}

#[tokio::test]
async fn test_not_found_is_retried_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());
    let sink = Arc::new(RecordingSink::default());

    let failed = fetcher(sink.clone())
        .fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(failed, FetchFailed::Exhausted { attempts: 3, .. }));
    assert!(matches!(
        failed.last_error(),
        DownloadError::HttpStatus { status: 404, .. }
    ));
    assert!(!dest.exists());
    assert_eq!(sink.count("exhausted"), 1);
}

#[tokio::test]
async fn test_bad_magic_discarded_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(b"<html>service unavailable</html>".to_vec()),
        )
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());
    let sink = Arc::new(RecordingSink::default());

    let failed = fetcher(sink.clone())
        .fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(failed.attempts(), 3);
    assert!(matches!(
        failed.last_error(),
        DownloadError::Integrity {
            violation: IntegrityViolation::BadMagic,
            ..
        }
    ));
    assert!(!dest.exists(), "rejected artifact must not survive");
    assert_eq!(sink.count("integrity_rejected"), 3);
}

#[tokio::test]
async fn test_integrity_retry_skips_transport_backoff() {
    let server = MockServer::start().await;
    serve(&server, 200, vec![0u8; 32]).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());
    let sink = Arc::new(RecordingSink::default());
    let policy = RetryPolicy::new(Duration::from_secs(30), Duration::ZERO);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        fetcher_with(policy, IntegrityMode::Structural, sink.clone()).fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("integrity retries must not wait for the transport backoff");

    assert_eq!(result.unwrap_err().attempts(), 3);
    assert_eq!(sink.count("backing_off"), 0);
}

#[tokio::test]
async fn test_transport_failure_waits_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, 200, sample_archive()).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());
    let sink = Arc::new(RecordingSink::default());
    let policy = RetryPolicy::new(Duration::from_millis(300), Duration::ZERO);

    let started = Instant::now();
    let fetched = fetcher_with(policy, IntegrityMode::Structural, sink.clone())
        .fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(fetched.attempts, 2);
    assert_eq!(sink.count("backing_off"), 1);
}

#[tokio::test]
async fn test_cancel_during_backoff_aborts() {
    let server = MockServer::start().await;
    serve(&server, 500, Vec::new()).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());
    let sink = Arc::new(RecordingSink::default());
    let policy = RetryPolicy::new(Duration::from_secs(60), Duration::ZERO);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let failed = tokio::time::timeout(
        Duration::from_secs(10),
        fetcher_with(policy, IntegrityMode::Structural, sink.clone()).fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &cancel,
        ),
    )
    .await
    .expect("cancellation must interrupt the backoff")
    .unwrap_err();

    assert!(matches!(failed, FetchFailed::Aborted { attempt: 1, .. }));
    assert!(matches!(failed.last_error(), DownloadError::Cancelled { .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_garbled_body_passes_structural_but_not_prefix_decode() {
    let server = MockServer::start().await;
    serve(&server, 200, garbled_archive()).await;
    let url = format!("{}{ARCHIVE}", server.uri());
    let dir = TempDir::new().unwrap();

    let structural_dest = dir.path().join("structural.json.gz");
    let accepted = fetcher_with(
        RetryPolicy::immediate(),
        IntegrityMode::Structural,
        Arc::new(RecordingSink::default()),
    )
    .fetch(
        &FetchRequest {
            url: &url,
            dest: &structural_dest,
            max_attempts: 1,
        },
        &CancellationToken::new(),
    )
    .await;
    assert!(accepted.is_ok());
    assert!(structural_dest.exists());

    let decode_dest = dir.path().join("decode.json.gz");
    let rejected = fetcher_with(
        RetryPolicy::immediate(),
        IntegrityMode::PrefixDecode,
        Arc::new(RecordingSink::default()),
    )
    .fetch(
        &FetchRequest {
            url: &url,
            dest: &decode_dest,
            max_attempts: 2,
        },
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        rejected.last_error(),
        DownloadError::Integrity {
            violation: IntegrityViolation::CorruptStream { .. },
            ..
        }
    ));
    assert!(!decode_dest.exists());
}

#[tokio::test]
async fn test_missing_parent_directory_aborts_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(sample_archive()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("no-such-dir").join("a.json.gz");
    let url = format!("{}{ARCHIVE}", server.uri());

    let failed = fetcher(Arc::new(RecordingSink::default()))
        .fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(failed, FetchFailed::Aborted { attempt: 1, .. }));
    assert!(matches!(failed.last_error(), DownloadError::Io { .. }));
}

#[tokio::test]
async fn test_unreachable_host_exhausts_attempts() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let sink = Arc::new(RecordingSink::default());

    // Port 9 (discard) is closed on test hosts; connection is refused.
    let failed = fetcher(sink.clone())
        .fetch(
            &FetchRequest {
                url: "http://127.0.0.1:9/2021-03-15-7.json.gz",
                dest: &dest,
                max_attempts: 2,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(failed, FetchFailed::Exhausted { attempts: 2, .. }));
    assert!(matches!(
        failed.last_error(),
        DownloadError::Network { .. } | DownloadError::Timeout { .. }
    ));
    assert_eq!(sink.count("transport_failed"), 2);
}

#[tokio::test]
async fn test_connection_closed_mid_body_leaves_no_file() {
    let url = spawn_short_body_server(sample_archive(), AfterBody::Close).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let sink = Arc::new(RecordingSink::default());

    let failed = fetcher(sink.clone())
        .fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(failed, FetchFailed::Exhausted { attempts: 3, .. }));
    assert!(matches!(failed.last_error(), DownloadError::Network { .. }));
    assert!(!dest.exists(), "partial body must not survive");
    assert_eq!(
        sink.labels(),
        vec![
            "attempt:1",
            "transport_failed",
            "attempt:2",
            "transport_failed",
            "attempt:3",
            "transport_failed",
            "exhausted",
        ]
    );
}

#[tokio::test]
async fn test_stalled_body_times_out_and_leaves_no_file() {
    let url = spawn_short_body_server(sample_archive(), AfterBody::Stall).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let client =
        HttpClient::with_timeouts(Duration::from_secs(5), Duration::from_millis(300)).unwrap();

    let failed = tokio::time::timeout(
        Duration::from_secs(20),
        fetcher_with_client(client, Arc::new(RecordingSink::default())).fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 2,
            },
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("read timeout must end the stalled transfer")
    .unwrap_err();

    assert!(matches!(failed, FetchFailed::Exhausted { attempts: 2, .. }));
    assert!(matches!(failed.last_error(), DownloadError::Timeout { .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_cancel_mid_body_removes_partial_file() {
    let url = spawn_short_body_server(sample_archive(), AfterBody::Stall).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.json.gz");
    let cancel = CancellationToken::new();

    // Cancel only once the transfer has started writing the destination.
    let watcher = {
        let dest = dest.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            while started.elapsed() < Duration::from_secs(10) {
                if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                    cancel.cancel();
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
            false
        })
    };

    let failed = tokio::time::timeout(
        Duration::from_secs(20),
        fetcher(Arc::new(RecordingSink::default())).fetch(
            &FetchRequest {
                url: &url,
                dest: &dest,
                max_attempts: 3,
            },
            &cancel,
        ),
    )
    .await
    .expect("cancellation must interrupt the transfer")
    .unwrap_err();

    assert!(watcher.await.unwrap(), "destination was never created");
    assert!(matches!(failed, FetchFailed::Aborted { attempt: 1, .. }));
    assert!(matches!(failed.last_error(), DownloadError::Cancelled { .. }));
    assert!(!dest.exists(), "partial file must be removed on cancel");
}
