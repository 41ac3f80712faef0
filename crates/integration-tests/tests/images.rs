//! Image delivery, derivation cache and uploads over HTTP.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::body::Body;
use axum::http::{Request, StatusCode, header};

use kumas_integration_tests::{BASE_URL, TestApp, body_bytes, body_json, header_value, png};
use kumas_storefront::images::{ImageQuery, TransformDescriptor, cache_key};
use kumas_storefront::storage::{ObjectStore, StoredObject};

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

async fn with_original(app: &TestApp) {
    app.objects
        .put(
            "originals/swatch.png",
            StoredObject::new(png(80, 40), "image/png"),
        )
        .await
        .unwrap();
}

fn cache_entries(app: &TestApp) -> Vec<String> {
    app.objects
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("cache/"))
        .collect()
}

fn multipart(file_name: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "kumas-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::post("/api/images/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_derived_variant_served_with_immutable_caching() {
    let app = TestApp::new();
    with_original(&app).await;

    let response = app
        .get("/images/swatch.png?w=20&h=20&fit=cover&fm=png")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, header::CONTENT_TYPE), "image/png");
    assert_eq!(header_value(&response, header::CACHE_CONTROL), IMMUTABLE);

    let bytes = body_bytes(response).await;
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (20, 20));
}

#[tokio::test]
async fn test_same_request_is_byte_identical_and_transformed_once() {
    let app = TestApp::new();
    with_original(&app).await;
    let uri = "/images/swatch.png?w=30&fit=inside&q=70&fm=jpeg";

    let first = body_bytes(app.get(uri).await).await;
    let second = body_bytes(app.get(uri).await).await;

    assert_eq!(first, second);
    assert_eq!(app.transformer.transforms(), 1);

    let query = ImageQuery {
        w: Some("30".to_string()),
        fit: Some("inside".to_string()),
        q: Some("70".to_string()),
        fm: Some("jpeg".to_string()),
        ..ImageQuery::default()
    };
    let key = cache_key(
        "originals/swatch.png",
        &TransformDescriptor::from_query(&query).unwrap(),
    );
    assert_eq!(cache_entries(&app), vec![key]);
}

#[tokio::test]
async fn test_quality_change_yields_new_variant() {
    let app = TestApp::new();
    with_original(&app).await;

    app.get("/images/swatch.png?w=30&q=70&fm=jpeg").await;
    app.get("/images/swatch.png?w=30&q=71&fm=jpeg").await;

    assert_eq!(app.transformer.transforms(), 2);
    assert_eq!(cache_entries(&app).len(), 2);
}

#[tokio::test]
async fn test_explicit_defaults_share_cache_entry() {
    let app = TestApp::new();
    with_original(&app).await;

    app.get("/images/swatch.png?w=30").await;
    app.get("/images/swatch.png?w=30&fit=cover&crop=center&q=80&fm=webp")
        .await;

    assert_eq!(app.transformer.transforms(), 1);
    assert_eq!(cache_entries(&app).len(), 1);
}

#[tokio::test]
async fn test_missing_original_is_not_found() {
    let app = TestApp::new();

    let response = app.get("/images/nope.png?w=10").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.transformer.transforms(), 0);
    assert!(cache_entries(&app).is_empty());
}

#[tokio::test]
async fn test_invalid_parameters_rejected() {
    let app = TestApp::new();
    with_original(&app).await;

    for uri in [
        "/images/swatch.png?fit=stretch",
        "/images/swatch.png?fm=avif",
        "/images/swatch.png?q=0",
        "/images/swatch.png?w=99999",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
    assert_eq!(app.transformer.transforms(), 0);
}

#[tokio::test]
async fn test_thin_original_cannot_blow_up_intermediate_size() {
    let app = TestApp::new();
    app.objects
        .put(
            "originals/selvage.png",
            StoredObject::new(png(2, 1000), "image/png"),
        )
        .await
        .unwrap();

    let outside = app
        .get("/images/selvage.png?w=4096&h=4096&fit=outside&fm=jpeg")
        .await;
    assert_eq!(outside.status(), StatusCode::BAD_REQUEST);

    let cover = app
        .get("/images/selvage.png?w=512&h=512&fit=cover&fm=jpeg")
        .await;
    assert_eq!(cover.status(), StatusCode::OK);
    let decoded = image::load_from_memory(&body_bytes(cover).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (512, 512));
    assert_eq!(cache_entries(&app).len(), 1);
}

#[tokio::test]
async fn test_video_served_verbatim() {
    let app = TestApp::new();
    let clip = b"\x00\x00\x00\x18ftypmp42fake-video".to_vec();
    app.objects
        .put("videos/clip.mp4", StoredObject::new(clip.clone(), "video/mp4"))
        .await
        .unwrap();

    let response = app.get("/images/clip.mp4?type=video&w=10").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, header::CONTENT_TYPE), "video/mp4");
    assert_eq!(body_bytes(response).await, clip);
    assert_eq!(app.transformer.transforms(), 0);
}

#[tokio::test]
async fn test_upload_then_serve() {
    let app = TestApp::new();

    let response = app
        .send(multipart("Keten Kumas (1).png", "image/png", &png(32, 32)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let path = body["path"].as_str().unwrap().to_string();
    assert!(path.starts_with("originals/"));
    assert!(path.ends_with("-Keten_Kumas__1_.png"));
    assert_eq!(body["url"], format!("{BASE_URL}/images/{path}"));
    assert!(app.objects.contains(&path));
    assert_eq!(app.transformer.normalizations(), 1);

    let served = app.get(&format!("/images/{path}?w=16&fm=png")).await;
    assert_eq!(served.status(), StatusCode::OK);
    let decoded = image::load_from_memory(&body_bytes(served).await).unwrap();
    assert_eq!(decoded.width(), 16);
}

#[tokio::test]
async fn test_video_upload_stored_under_videos() {
    let app = TestApp::new();

    let response = app
        .send(multipart("tanitim.mp4", "video/mp4", b"not-really-mp4"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let path = body["path"].as_str().unwrap();
    assert!(path.starts_with("videos/"));
    assert!(body["url"].as_str().unwrap().ends_with("?type=video"));
    assert_eq!(app.transformer.normalizations(), 0);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let app = TestApp::new();

    let response = app
        .send(multipart("notes.pdf", "application/pdf", b"%PDF-1.7"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.objects.keys().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_oversized_file() {
    let app = TestApp::new();
    let too_big = vec![0_u8; 2 * 1024 * 1024 + 1];

    let response = app.send(multipart("big.gif", "image/gif", &too_big)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.objects.keys().is_empty());
}
