mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use common::{Harness, TIMEWEB, YANDEX, harness, harness_with, test_config};
use object_gateway::{models::new_id, routes::routes::routes};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    routes(1024 * 1024).with_state(h.state.clone())
}

async fn send(h: &Harness, request: Request<Body>) -> Response {
    app(h).oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_value<'a>(response: &'a Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn create(h: &Harness, length: u64) -> String {
    let response = send(
        h,
        Request::builder()
            .method(Method::POST)
            .uri("/files")
            .header("Tus-Resumable", "1.0.0")
            .header("Upload-Length", length.to_string())
            .header(
                "Upload-Metadata",
                format!("filename {}", general_purpose::STANDARD.encode("a.bin")),
            )
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = header_value(&response, "location");
    location.trim_start_matches("/files/").to_string()
}

fn patch(id: &str, offset: u64, body: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method(Method::PATCH)
        .uri(format!("/files/{}", id))
        .header(header::CONTENT_TYPE, "application/offset+octet-stream")
        .header("Upload-Offset", offset.to_string())
        .body(Body::from(Bytes::from_static(body)))
        .unwrap()
}

fn head(id: &str) -> Request<Body> {
    Request::builder()
        .method(Method::HEAD)
        .uri(format!("/files/{}", id))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn options_advertises_capabilities() {
    let mut cfg = test_config();
    cfg.max_upload_size = Some(1 << 30);
    let h = harness_with(cfg).await;

    let response = send(
        &h,
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/files")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_value(&response, "tus-resumable"), "1.0.0");
    assert_eq!(header_value(&response, "tus-version"), "1.0.0");
    assert!(header_value(&response, "tus-extension").contains("creation"));
    assert_eq!(header_value(&response, "tus-checksum-algorithm"), "md5");
    assert_eq!(header_value(&response, "tus-max-size"), "1073741824");
}

#[tokio::test]
async fn create_returns_location_with_object_id() {
    let h = harness().await;
    h.backend_with_bucket(YANDEX, "uploads").await;

    let id = create(&h, 10).await;
    assert_eq!(id.len(), 32);

    let response = send(&h, head(&id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, "upload-offset"), "0");
    assert_eq!(header_value(&response, "upload-length"), "10");
    assert_eq!(header_value(&response, "cache-control"), "no-store");
    assert_eq!(header_value(&response, "upload-metadata"), "filename YS5iaW4=");
}

#[tokio::test]
async fn create_without_length_is_bad_request() {
    let h = harness().await;
    let response = send(
        &h,
        Request::builder()
            .method(Method::POST)
            .uri("/files")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_create_is_rejected() {
    let mut cfg = test_config();
    cfg.max_upload_size = Some(5);
    let h = harness_with(cfg).await;
    h.backend_with_bucket(YANDEX, "uploads").await;

    let response = send(
        &h,
        Request::builder()
            .method(Method::POST)
            .uri("/files")
            .header("Upload-Length", "6")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn patch_at_wrong_offset_conflicts() {
    let h = harness().await;
    h.backend_with_bucket(YANDEX, "uploads").await;
    let id = create(&h, 100).await;

    let response = send(&h, patch(&id, 50, b"chunk")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(&h, head(&id)).await;
    assert_eq!(header_value(&response, "upload-offset"), "0");
}

#[tokio::test]
async fn patch_uploads_chunks_until_complete() {
    let h = harness().await;
    let backend = h.backend_with_bucket(YANDEX, "uploads").await;
    let id = create(&h, 8).await;

    let response = send(&h, patch(&id, 0, b"abcd")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_value(&response, "upload-offset"), "4");
    assert_eq!(header_value(&response, "tus-resumable"), "1.0.0");

    let response = send(&h, patch(&id, 4, b"efgh")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_value(&response, "upload-offset"), "8");

    assert_eq!(
        backend.object_data("uploads", &id).unwrap(),
        Bytes::from_static(b"abcdefgh")
    );
    let listing = json_body(
        send(
            &h,
            Request::builder()
                .uri("/files")
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    assert_eq!(listing, json!([]));

    let response = send(&h, patch(&id, 8, b"")).await;
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn patch_requires_offset_content_type() {
    let h = harness().await;
    h.backend_with_bucket(YANDEX, "uploads").await;
    let id = create(&h, 4).await;

    let response = send(
        &h,
        Request::builder()
            .method(Method::PATCH)
            .uri(format!("/files/{}", id))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("Upload-Offset", "0")
            .body(Body::from("data"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn patch_verifies_md5_checksum() {
    let h = harness().await;
    h.backend_with_bucket(YANDEX, "uploads").await;
    let id = create(&h, 4).await;

    let wrong = general_purpose::STANDARD.encode(md5::compute(b"nope").0);
    let mut request = patch(&id, 0, b"data");
    request.headers_mut().insert(
        "upload-checksum",
        format!("md5 {}", wrong).parse().unwrap(),
    );
    let response = send(&h, request).await;
    assert_eq!(response.status().as_u16(), 460);

    let right = general_purpose::STANDARD.encode(md5::compute(b"data").0);
    let mut request = patch(&id, 0, b"data");
    request.headers_mut().insert(
        "upload-checksum",
        format!("md5 {}", right).parse().unwrap(),
    );
    let response = send(&h, request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let h = harness().await;
    assert_eq!(send(&h, head(&new_id())).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(send(&h, head("not-an-id")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        send(&h, patch("not-an-id", 0, b"x")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn replication_task_is_accepted_and_tracked() {
    let h = harness().await;
    let source = h.backend_with_bucket(YANDEX, "src").await;
    h.backend_with_bucket(TIMEWEB, "dst").await;
    let object_id = new_id();
    source.put_object("src", &object_id, Bytes::from_static(b"payload"));
    let _runner = h
        .state
        .tasks
        .start(h.state.shutdown.clone())
        .await
        .unwrap();

    let body = json!({
        "source_storage": {"provider_id": YANDEX, "bucket": "src"},
        "target_storage": {"provider_id": TIMEWEB, "bucket": "dst"},
    });
    let response = send(
        &h,
        Request::builder()
            .method(Method::POST)
            .uri(format!("/tasks/replicate/{}", object_id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task_id = json_body(response).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let response = send(
                &h,
                Request::builder()
                    .uri(format!("/tasks/{}", task_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            let task = json_body(response).await;
            if task["status"] != "created" {
                return task["status"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(status, "completed");
    h.state.shutdown.cancel();
}

#[tokio::test]
async fn synchronous_replication_returns_replica() {
    let h = harness().await;
    let source = h.backend_with_bucket(YANDEX, "src").await;
    h.backend_with_bucket(TIMEWEB, "dst").await;
    let object_id = new_id();
    source.put_object("src", &object_id, Bytes::from_static(b"payload"));

    let body = json!({
        "source_storage": {"provider_id": YANDEX, "bucket": "src"},
        "target_storage": {"provider_id": TIMEWEB, "bucket": "dst"},
    });
    let request = |object_id: &str| {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/replication/{}", object_id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let response = send(&h, request(&object_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"id": object_id, "bucket": "dst"})
    );

    let response = send(&h, request(&new_id())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn accounts_and_providers() {
    let h = harness().await;

    let response = send(
        &h,
        Request::builder()
            .uri("/providers")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let providers = json_body(response).await;
    assert_eq!(providers[0]["name"], "yandex");
    assert_eq!(providers[1]["name"], "timeweb");

    let add = |provider: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/accounts")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "provider": provider,
                    "region": "ru-central1",
                    "access_key": "AKID",
                    "secret": "s3cr3t",
                })
                .to_string(),
            ))
            .unwrap()
    };
    let response = send(&h, add(YANDEX)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = json_body(response).await["id"].as_str().unwrap().to_string();
    assert_eq!(
        h.state.accounts.get_account(&id).await.unwrap().access_key,
        "AKID"
    );

    assert_eq!(send(&h, add("42")).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let h = harness().await;
    for uri in ["/healthz", "/readyz"] {
        let response = send(
            &h,
            Request::builder().uri(uri).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    }
}
