//! HTTP-level tests: the reqwest client and retry loop against a mock
//! upstream, and the S3 store against a mock S3 endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use checkmate::config::{ApiConfig, S3StorageConfig};
use checkmate::fetch::{Fetcher, ReqwestClient, RetryPolicy};
use checkmate::secrets::SecretSource;
use checkmate::store::s3::S3ObjectStore;
use checkmate::store::ObjectStore;

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        jitter: Duration::ZERO,
    }
}

fn fetcher(server: &MockServer, max_retries: u32) -> (Fetcher, ApiConfig) {
    let api = ApiConfig {
        base_url: server.uri(),
        user_agent: "checkmate-test (contact: test@example.com)".to_string(),
        timeout_secs: 5,
    };
    let client = Arc::new(ReqwestClient::new(&api).unwrap());
    (Fetcher::new(client, fast_policy(max_retries)), api)
}

#[tokio::test]
async fn test_fetch_returns_body_and_sends_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/player/hikaru/games/2024/01"))
        .and(header("User-Agent", "checkmate-test (contact: test@example.com)"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"games": []}"#))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, api) = fetcher(&server, 5);
    let url = format!("{}/player/hikaru/games/2024/01", server.uri());
    let body = fetcher.fetch(&url, &api.request_headers()).await;
    assert_eq!(body.as_deref(), Some(r#"{"games": []}"#));
}

#[tokio::test]
async fn test_persistent_500_makes_exactly_max_retries_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let (fetcher, api) = fetcher(&server, 4);
    let url = format!("{}/leaderboards", server.uri());
    assert!(fetcher.fetch(&url, &api.request_headers()).await.is_none());
}

#[tokio::test]
async fn test_404_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, api) = fetcher(&server, 5);
    let url = format!("{}/player/nobody/games/2024/01", server.uri());
    assert!(fetcher.fetch(&url, &api.request_headers()).await.is_none());
}

#[tokio::test]
async fn test_recovers_after_rate_limiting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, api) = fetcher(&server, 5);
    let url = format!("{}/leaderboards", server.uri());
    assert_eq!(
        fetcher.fetch(&url, &api.request_headers()).await.as_deref(),
        Some("{}")
    );
}

/// Read one request head from `socket`.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn test_truncated_body_is_retried() {
    // The first connection promises 1000 bytes and hangs up after 10.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let seen = connections.clone();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let n = seen.fetch_add(1, Ordering::SeqCst);
            read_request(&mut socket).await;
            let response: &[u8] = if n == 0 {
                b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n0123456789"
            } else {
                b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\nConnection: close\r\n\r\n{\"games\": []}"
            };
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    let api = ApiConfig {
        base_url: format!("http://{}", addr),
        user_agent: "checkmate-test".to_string(),
        timeout_secs: 5,
    };
    let client = Arc::new(ReqwestClient::new(&api).unwrap());
    let fetcher = Fetcher::new(client, fast_policy(3));
    let url = format!("http://{}/player/hikaru/games/2024/01", addr);

    let body = fetcher.fetch(&url, &api.request_headers()).await;
    assert_eq!(body.as_deref(), Some(r#"{"games": []}"#));
    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

// ============ S3 ============

struct StaticSecrets;

impl SecretSource for StaticSecrets {
    fn get_secret(&self, name: &str) -> Result<String> {
        match name {
            "storage-access-key-id" => Ok("AKIDEXAMPLE".to_string()),
            "storage-secret-access-key" => Ok("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            other => anyhow::bail!("no secret {}", other),
        }
    }
}

fn s3_store(server: &MockServer) -> S3ObjectStore {
    let config = S3StorageConfig {
        bucket: "chess-api".to_string(),
        region: "us-east-1".to_string(),
        endpoint_url: Some(server.uri()),
        access_key_secret: "storage-access-key-id".to_string(),
        secret_key_secret: "storage-secret-access-key".to_string(),
        timeout_secs: 5,
    };
    S3ObjectStore::new(config, &StaticSecrets).unwrap()
}

#[tokio::test]
async fn test_s3_list_follows_continuation_tokens() {
    let server = MockServer::start().await;
    let page1 = r#"<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>page2</NextContinuationToken>
  <Contents><Key>player/bob/games/2024/01</Key></Contents>
</ListBucketResult>"#;
    let page2 = r#"<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>player/alice/games/2024/01</Key></Contents>
</ListBucketResult>"#;

    Mock::given(method("GET"))
        .and(path("/chess-api"))
        .and(query_param("continuation-token", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page2))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chess-api"))
        .and(query_param("list-type", "2"))
        .and(query_param("prefix", "player/"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page1))
        .expect(1)
        .mount(&server)
        .await;

    let store = s3_store(&server);
    let keys = store.list("player/").await.unwrap();
    assert_eq!(
        keys,
        vec!["player/alice/games/2024/01", "player/bob/games/2024/01"]
    );
}

#[tokio::test]
async fn test_s3_object_round_trip_requests() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/chess-api/player/alice/games/2024/01"))
        .and(header_exists("x-amz-content-sha256"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chess-api/player/alice/games/2024/01"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"games": []}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/chess-api/player/alice/games/2024/01"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = s3_store(&server);
    store
        .write_text("player/alice/games/2024/01", r#"{"games": []}"#)
        .await
        .unwrap();
    assert_eq!(
        store.read_text("player/alice/games/2024/01").await.unwrap(),
        r#"{"games": []}"#
    );
    store.delete("player/alice/games/2024/01").await.unwrap();
}

#[tokio::test]
async fn test_s3_missing_object_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = s3_store(&server);
    assert!(store.read_text("player/x/games/2024/01").await.is_err());
}

#[tokio::test]
async fn test_s3_hung_request_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let store_config = S3StorageConfig {
        bucket: "chess-api".to_string(),
        region: "us-east-1".to_string(),
        endpoint_url: Some(server.uri()),
        access_key_secret: "storage-access-key-id".to_string(),
        secret_key_secret: "storage-secret-access-key".to_string(),
        timeout_secs: 1,
    };
    let store = S3ObjectStore::new(store_config, &StaticSecrets).unwrap();

    let started = std::time::Instant::now();
    assert!(store.read_text("player/x/games/2024/01").await.is_err());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_s3_requires_credentials() {
    let config = S3StorageConfig {
        bucket: "chess-api".to_string(),
        region: "us-east-1".to_string(),
        endpoint_url: None,
        access_key_secret: "missing-key".to_string(),
        secret_key_secret: "storage-secret-access-key".to_string(),
        timeout_secs: 5,
    };
    assert!(S3ObjectStore::new(config, &StaticSecrets).is_err());
}
