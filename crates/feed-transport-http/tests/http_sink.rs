use std::sync::Arc;
use std::time::Duration;

use feed_records::{Dataset, PairedDataset, Record};
use feed_replay::{Batch, ReplayCoordinator, ReplayError, ReplaySettings, Sink, SinkError};
use feed_transport_http::{HttpSink, PlatformClient, PlatformConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Debug)]
struct CapturedRequest {
    request_line: String,
    authorization: Option<String>,
    body: Value,
}

/// Minimal HTTP/1.1 endpoint answering every request with `statuses` in turn.
async fn spawn_endpoint(statuses: Vec<u16>) -> (String, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for status in statuses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 4096];
            let header_end = loop {
                let read = socket.read(&mut chunk).await.unwrap();
                assert!(read > 0, "client closed before sending headers");
                buffer.extend_from_slice(&chunk[..read]);
                if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            while buffer.len() < header_end + content_length {
                let read = socket.read(&mut chunk).await.unwrap();
                buffer.extend_from_slice(&chunk[..read]);
            }
            let authorization = head.lines().find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("authorization")
                    .then(|| value.trim().to_string())
            });
            let body = serde_json::from_slice(&buffer[header_end..header_end + content_length])
                .unwrap_or(Value::Null);
            tx.send(CapturedRequest {
                request_line: head.lines().next().unwrap_or_default().to_string(),
                authorization,
                body,
            })
            .unwrap();

            let reply = if status == 200 { "ok" } else { "backend unavailable" };
            let response = format!(
                "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
                reply.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{addr}"), rx)
}

fn client(url: &str) -> Arc<PlatformClient> {
    let mut config = PlatformConfig::new(url, "test-key");
    config.request_timeout_ms = 5_000;
    Arc::new(PlatformClient::connect(&config).unwrap())
}

fn batch() -> Batch {
    Batch::new(
        0,
        0..2,
        vec![
            Record::new().with("transactionID", "t-0").with("timestamp", 100),
            Record::new().with("transactionID", "t-1").with("timestamp", 101),
        ],
    )
}

#[tokio::test]
async fn posts_rows_as_json_array() {
    let (url, mut requests) = spawn_endpoint(vec![200]).await;
    let sink = HttpSink::new(client(&url));

    sink.upload("qs_transactions", &batch()).await.unwrap();

    let request = requests.recv().await.unwrap();
    assert_eq!(
        request.request_line,
        "POST /api/dataset/qs_transactions/upload HTTP/1.1"
    );
    assert_eq!(request.authorization.as_deref(), Some("apiKey test-key"));
    assert_eq!(
        request.body,
        json!([
            { "transactionID": "t-0", "timestamp": 100 },
            { "transactionID": "t-1", "timestamp": 101 }
        ])
    );
}

#[tokio::test]
async fn non_success_status_is_a_sink_error() {
    let (url, _requests) = spawn_endpoint(vec![503]).await;
    let sink = HttpSink::new(client(&url));

    let err = sink.upload("qs_transactions", &batch()).await.unwrap_err();
    assert_eq!(
        err,
        SinkError::Status {
            status: 503,
            body: "backend unavailable".into()
        }
    );
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let sink = HttpSink::new(client(&url));
    let err = sink.upload("qs_transactions", &batch()).await.unwrap_err();
    assert!(matches!(err, SinkError::Transport(_)));
}

#[tokio::test]
async fn coordinator_stops_on_first_failed_upload() {
    let (url, mut requests) = spawn_endpoint(vec![200, 200, 500]).await;
    let sink = Arc::new(HttpSink::new(client(&url)));
    let rows = |name: &str| {
        Dataset::new(
            name,
            (0..6).map(|i| Record::new().with("id", i)).collect(),
        )
    };
    let datasets = PairedDataset::new(rows("tx"), rows("labels")).unwrap();
    let coordinator =
        ReplayCoordinator::new(ReplaySettings::new(3, Duration::ZERO), sink).unwrap();

    let err = coordinator.coordinate_at(&datasets, 0).await.unwrap_err();
    assert!(matches!(err, ReplayError::Delivery { step: 1, .. }));

    let mut paths = Vec::new();
    while let Ok(request) = requests.try_recv() {
        paths.push(request.request_line);
    }
    assert_eq!(
        paths,
        vec![
            "POST /api/dataset/qs_transactions/upload HTTP/1.1",
            "POST /api/dataset/qs_transaction_labels/upload HTTP/1.1",
            "POST /api/dataset/qs_transactions/upload HTTP/1.1",
        ]
    );
}
