//! The blocking client cannot be built or dropped on a runtime thread, so every wiremock
//! test runs its calls inside `spawn_blocking`. Streaming tests use a raw socket server
//! because wiremock only delays whole responses.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gdc_cohort::domain::FileId;
use gdc_cohort::error::GdcError;
use gdc_cohort::gdc::{CatalogClient, DataClient, GdcHttpClient};
use gdc_cohort::transport::{RetryPolicy, RetryingTransport};

fn fast_policy(total: u32) -> RetryPolicy {
    RetryPolicy {
        total,
        backoff_factor: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

fn ids(values: &[&str]) -> Vec<FileId> {
    values.iter().map(|value| value.parse().unwrap()).collect()
}

async fn post(uri: String, policy: RetryPolicy) -> (u16, Vec<u8>) {
    tokio::task::spawn_blocking(move || {
        let transport = RetryingTransport::new(policy, Duration::from_secs(5)).unwrap();
        let response = transport.post_json(&uri, &json!({"ids": ["A"]})).unwrap();
        let status = response.status().as_u16();
        (status, response.bytes().unwrap().to_vec())
    })
    .await
    .expect("task")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_status_is_absorbed() {
    let flaky = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&flaky)
        .await;
    Mock::given(method("POST"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bundle-bytes".to_vec()))
        .mount(&flaky)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bundle-bytes".to_vec()))
        .mount(&healthy)
        .await;

    let retried = post(format!("{}/data", flaky.uri()), fast_policy(5)).await;
    let direct = post(format!("{}/data", healthy.uri()), fast_policy(5)).await;

    assert_eq!(retried, (200, b"bundle-bytes".to_vec()));
    assert_eq!(retried, direct);
    assert_eq!(flaky.received_requests().await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = post(format!("{}/data", server.uri()), fast_policy(5)).await;

    assert_eq!(status, 404);
    assert_eq!(body, b"not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_budget_returns_last_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let (status, body) = post(format!("{}/data", server.uri()), fast_policy(2)).await;

    assert_eq!(status, 502);
    assert_eq!(body, b"bad gateway");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookup_posts_an_in_filter_and_reads_hits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .and(body_partial_json(json!({
            "filters": {"op": "in", "content": {"field": "file_id", "value": ["A", "B", "C"]}},
            "size": 3
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"hits": [{"id": "C", "file_id": "C"}, {"id": "A", "file_id": "A"}]},
            "warnings": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let hits = tokio::task::spawn_blocking(move || {
        let client = GdcHttpClient::new(
            &uri,
            fast_policy(1),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();
        client.lookup_file_ids(&ids(&["A", "B", "C"]))
    })
    .await
    .expect("task")
    .unwrap();

    assert_eq!(hits, vec!["C".to_string(), "A".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookup_failure_after_retries_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(500).set_body_string("catalog down"))
        .expect(2)
        .mount(&server)
        .await;

    let uri = server.uri();
    let result = tokio::task::spawn_blocking(move || {
        let client = GdcHttpClient::new(
            &uri,
            fast_policy(1),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();
        client.lookup_file_ids(&ids(&["A"]))
    })
    .await
    .expect("task");

    assert_matches!(
        result,
        Err(GdcError::CatalogStatus { status: 500, ref message }) if message == "catalog down"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bundle_request_exposes_name_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data"))
        .and(body_json(json!({"ids": ["A", "C"]})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Content-Disposition",
                    "attachment; filename=gdc_download_20241022.tar.gz",
                )
                .set_body_bytes(b"archive".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let uri = format!("{}/", server.uri());
    let (status, disposition, body) = tokio::task::spawn_blocking(move || {
        let client = GdcHttpClient::new(
            &uri,
            fast_policy(1),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();
        let response = client.request_bundle(&ids(&["A", "C"])).unwrap();
        let status = response.status();
        let disposition = response.content_disposition().map(str::to_string);
        let mut body = Vec::new();
        response.into_body().read_to_end(&mut body).unwrap();
        (status, disposition, body)
    })
    .await
    .expect("task");

    assert_eq!(status, 200);
    assert_eq!(
        disposition.as_deref(),
        Some("attachment; filename=gdc_download_20241022.tar.gz")
    );
    assert_eq!(body, b"archive");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bundle_rejection_is_returned_as_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(400).set_body_string("  invalid id list  "))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let (success, status, text) = tokio::task::spawn_blocking(move || {
        let client = GdcHttpClient::new(
            &uri,
            fast_policy(3),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();
        let response = client.request_bundle(&ids(&["A"])).unwrap();
        (response.is_success(), response.status(), response.diagnostic_text())
    })
    .await
    .expect("task");

    assert!(!success);
    assert_eq!(status, 400);
    assert_eq!(text, "invalid id list");
}

/// Accepts one connection, drains the request, then writes `head` followed by each chunk
/// after its pause. Returns the base URL.
fn serve_slowly(head: String, chunks: Vec<(Duration, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let read = stream.read(&mut buf).unwrap();
            request.extend_from_slice(&buf[..read]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
            if read == 0 {
                break;
            }
        }

        let _ = stream.write_all(head.as_bytes());
        for (pause, chunk) in chunks {
            thread::sleep(pause);
            if stream.write_all(&chunk).and_then(|_| stream.flush()).is_err() {
                return;
            }
        }
    });
    format!("http://{address}")
}

fn slow_client(base_url: &str, stall: Duration) -> GdcHttpClient {
    GdcHttpClient::new(base_url, fast_policy(0), stall, stall).unwrap()
}

#[test]
fn bundle_slower_than_the_timeout_still_arrives_whole() {
    let body: Vec<u8> = (0..20u8).collect();
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\
         Content-Disposition: attachment; filename=slow.tar.gz\r\n\r\n",
        body.len()
    );
    let chunks = body
        .iter()
        .map(|byte| (Duration::from_millis(150), vec![*byte]))
        .collect();
    let base_url = serve_slowly(head, chunks);

    // 20 chunks at 150 ms each take 3 s in total, three times the stall timeout.
    let client = slow_client(&base_url, Duration::from_secs(1));
    let response = client.request_bundle(&ids(&["A"])).unwrap();
    let mut received = Vec::new();
    response.into_body().read_to_end(&mut received).unwrap();

    assert_eq!(received, body);
}

#[test]
fn stalled_bundle_body_times_out() {
    let head = "HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n".to_string();
    let chunks = vec![
        (Duration::ZERO, vec![b'x'; 5]),
        (Duration::from_secs(3), vec![b'x'; 15]),
    ];
    let base_url = serve_slowly(head, chunks);

    let client = slow_client(&base_url, Duration::from_millis(500));
    let response = client.request_bundle(&ids(&["A"])).unwrap();
    let mut received = Vec::new();
    let result = response.into_body().read_to_end(&mut received);

    assert!(result.is_err());
    assert!(received.len() < 20);
}
