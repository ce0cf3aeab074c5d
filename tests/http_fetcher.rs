//! HTTP fetcher behavior against a local mock server.

use snapdoc::fetch::{FetchError, FetchOptions, HttpFetcher, ResourceFetcher};

fn inline_options(max_size: Option<u64>) -> FetchOptions {
    FetchOptions {
        as_data_uri: true,
        max_size: max_size.unwrap_or(0),
        max_size_enabled: max_size.is_some(),
        charset: None,
    }
}

#[tokio::test]
async fn encodes_payloads_as_data_uris() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/img.png")
        .with_header("content-type", "image/png")
        .with_body(vec![1u8, 2, 3])
        .create_async()
        .await;

    let fetcher = HttpFetcher::new();
    let url = format!("{}/img.png", server.url());
    let fetched = fetcher.fetch(&url, &inline_options(None)).await.unwrap();
    assert_eq!(fetched.data, "data:image/png;base64,AQID");
}

#[tokio::test]
async fn size_limit_rejections_are_distinct() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/big.bin")
        .with_header("content-type", "application/octet-stream")
        .with_body(vec![0u8; 64])
        .create_async()
        .await;

    let fetcher = HttpFetcher::new();
    let url = format!("{}/big.bin", server.url());
    let error = fetcher.fetch(&url, &inline_options(Some(16))).await.unwrap_err();
    assert!(matches!(error, FetchError::TooLarge { limit: 16, .. }));
}

#[tokio::test]
async fn error_statuses_fail_the_fetch() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/gone").with_status(404).create_async().await;

    let fetcher = HttpFetcher::new();
    let url = format!("{}/gone", server.url());
    let error = fetcher.fetch(&url, &inline_options(None)).await.unwrap_err();
    assert!(matches!(error, FetchError::Status { status: 404, .. }));
}

#[tokio::test]
async fn data_urls_pass_through_without_transport() {
    let fetcher = HttpFetcher::new();
    let fetched = fetcher
        .fetch("data:image/png;base64,AAA", &inline_options(None))
        .await
        .unwrap();
    assert_eq!(fetched.data, "data:image/png;base64,AAA");
}

#[tokio::test]
async fn text_fetches_report_charset() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/style.css")
        .with_header("content-type", "text/css; charset=utf-8")
        .with_body("body{color:red}")
        .create_async()
        .await;

    let fetcher = HttpFetcher::new();
    let url = format!("{}/style.css", server.url());
    let options = FetchOptions { as_data_uri: false, ..FetchOptions::default() };
    let fetched = fetcher.fetch(&url, &options).await.unwrap();
    assert_eq!(fetched.data, "body{color:red}");
    assert_eq!(fetched.charset.as_deref(), Some("utf-8"));
}
