//! HTTP train source against a local server serving canned responses

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use train_sim::config::SimConfig;
use train_sim::diagnostics::{Diagnostics, FailureKind};
use train_sim::simulation::{
    fallback_trains, FetchError, HttpTrainSource, TrainId, TrainRegistry, TrainSource,
};

const FETCH_TIMEOUT: Duration = Duration::from_millis(300);

enum Reply {
    Respond { status: &'static str, body: &'static str },
    Hang,
}

/// Serve a single request on a local port and return the URL to fetch
async fn serve_once(reply: Reply) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/train/getAllTrains", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        match reply {
            Reply::Respond { status, body } => {
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            Reply::Hang => tokio::time::sleep(Duration::from_secs(10)).await,
        }
    });

    url
}

/// A URL on a port nothing listens on
async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/train/getAllTrains", addr)
}

fn source(url: String) -> HttpTrainSource {
    HttpTrainSource::new(url, FETCH_TIMEOUT).unwrap()
}

/// Loading from a failing source must yield the built-in trains and one fetch failure
async fn assert_falls_back(source: &HttpTrainSource) {
    let config = SimConfig::default();
    let diagnostics = Diagnostics::new();

    let registry = TrainRegistry::load(source, &config, &diagnostics).await;

    assert_eq!(registry.trains(), fallback_trains(&config).as_slice());
    assert_eq!(diagnostics.count(FailureKind::Fetch), 1);
}

/// Test that a successful response is decoded into train records
#[tokio::test]
async fn test_ok_response_is_decoded() {
    let url = serve_once(Reply::Respond {
        status: "200 OK",
        body: r#"[{"id": 4, "name": "Night Train", "speedFactor": 0.5}]"#,
    })
    .await;

    let records = source(url).fetch().await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, Some(TrainId::Number(4)));
    assert_eq!(records[0].name.as_deref(), Some("Night Train"));
    assert_eq!(records[0].speed_factor, Some(0.5));
}

/// Test that a non-2xx status is a fetch failure
#[tokio::test]
async fn test_error_status_falls_back() {
    let reply = || Reply::Respond {
        status: "503 Service Unavailable",
        body: "",
    };

    let status = source(serve_once(reply()).await).fetch().await;
    assert!(matches!(
        status,
        Err(FetchError::Status(code)) if code == reqwest::StatusCode::SERVICE_UNAVAILABLE
    ));

    assert_falls_back(&source(serve_once(reply()).await)).await;
}

/// Test that a body that is not JSON is a fetch failure
#[tokio::test]
async fn test_invalid_json_falls_back() {
    let reply = || Reply::Respond {
        status: "200 OK",
        body: "not json",
    };

    let decoded = source(serve_once(reply()).await).fetch().await;
    assert!(matches!(decoded, Err(FetchError::Decode(_))));

    assert_falls_back(&source(serve_once(reply()).await)).await;
}

/// Test that a backend that never answers is cut off by the fetch timeout
#[tokio::test]
async fn test_unresponsive_backend_times_out() {
    let started = tokio::time::Instant::now();
    let hung = source(serve_once(Reply::Hang).await).fetch().await;

    match hung {
        Err(FetchError::Request(e)) => assert!(e.is_timeout(), "not a timeout: {}", e),
        other => panic!("expected a request timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_falls_back(&source(serve_once(Reply::Hang).await)).await;
}

/// Test that a refused connection is a fetch failure
#[tokio::test]
async fn test_refused_connection_falls_back() {
    let refused = source(refused_url().await).fetch().await;
    assert!(matches!(refused, Err(FetchError::Request(_))));

    assert_falls_back(&source(refused_url().await)).await;
}
