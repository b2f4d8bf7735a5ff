//! Integration tests for the image fetcher
//!
//! Exercises retry behavior and concurrent batch fetching against wiremock.

use base64::{engine::general_purpose, Engine};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use gemvision::config::RequestConfig;
use gemvision::images::{AnalysisRequest, ImageFetcher, ImageRef};

fn fast_config(max_retries: u32) -> RequestConfig {
    RequestConfig {
        model_timeout_ms: 5_000,
        fetch_timeout_ms: 5_000,
        max_retries,
        retry_delay_ms: 10, // keep backoff out of test runtime
    }
}

fn image_ref(id: i64, url: String, order: u32) -> ImageRef {
    ImageRef {
        id,
        url,
        original_filename: format!("img{id}.jpg"),
        order,
    }
}

#[tokio::test]
async fn test_fetch_returns_base64_of_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/img/1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake-jpeg-bytes".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = ImageFetcher::new(&fast_config(3)).unwrap();
    let encoded = fetcher
        .fetch_image(&format!("{}/img/1.jpg", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(encoded, general_purpose::STANDARD.encode(b"fake-jpeg-bytes"));
}

#[tokio::test]
async fn test_fetch_retries_until_success() {
    let mock_server = MockServer::start().await;

    // Two failures, then success on the third attempt.
    Mock::given(method("GET"))
        .and(path("/img/flaky.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/flaky.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&mock_server)
        .await;

    let fetcher = ImageFetcher::new(&fast_config(3)).unwrap();
    let result = fetcher
        .fetch_image(&format!("{}/img/flaky.jpg", mock_server.uri()))
        .await;

    assert!(result.is_ok(), "third attempt should succeed: {:?}", result.err());
}

#[tokio::test]
async fn test_fetch_exhaustion_is_fatal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/img/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&mock_server)
        .await;

    let fetcher = ImageFetcher::new(&fast_config(3)).unwrap();
    let result = fetcher
        .fetch_image(&format!("{}/img/gone.jpg", mock_server.uri()))
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("after 3 attempts"), "{err}");
}

#[tokio::test]
async fn test_fetch_all_yields_one_payload_per_image() {
    let mock_server = MockServer::start().await;

    for i in 1..=4 {
        Mock::given(method("GET"))
            .and(path(format!("/img/{i}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![i as u8; 8]))
            .mount(&mock_server)
            .await;
    }

    let images: Vec<ImageRef> = (1..=4)
        .map(|i| image_ref(i, format!("{}/img/{i}.jpg", mock_server.uri()), i as u32))
        .collect();
    let request = AnalysisRequest { item_id: 1, images };

    let fetcher = ImageFetcher::new(&fast_config(3)).unwrap();
    let payloads = fetcher.fetch_all(&request).await.unwrap();

    // Count parity must hold before any model call.
    assert_eq!(payloads.len(), request.images.len());
    let orders: Vec<u32> = payloads.iter().map(|p| p.order).collect();
    assert_eq!(orders, vec![1, 2, 3, 4], "payloads come back in display order");
}

#[tokio::test]
async fn test_fetch_all_fails_whole_item_on_one_bad_image() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/img/1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/2.jpg"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let request = AnalysisRequest {
        item_id: 1,
        images: vec![
            image_ref(1, format!("{}/img/1.jpg", mock_server.uri()), 1),
            image_ref(2, format!("{}/img/2.jpg", mock_server.uri()), 2),
        ],
    };

    let fetcher = ImageFetcher::new(&fast_config(2)).unwrap();
    let result = fetcher.fetch_all(&request).await;

    assert!(result.is_err(), "a partial image set must fail the item");
}
