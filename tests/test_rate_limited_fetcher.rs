use book_search_warmer::cache_key::author_query;
use book_search_warmer::error::WarmError;
use book_search_warmer::fetcher::{HttpTransport, RateLimitedFetcher, SearchClient};
use book_search_warmer::rate_limiter::RateGovernor;
use book_search_warmer::retry::RetryPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_for(server: &MockServer, max_attempts: u32) -> RateLimitedFetcher {
    let transport = HttpTransport::new(
        format!("{}/search/author", server.uri()),
        format!("{}/search/title", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap();
    RateLimitedFetcher::new(
        Arc::new(transport),
        Arc::new(RateGovernor::new(Duration::from_millis(1))),
        RetryPolicy::new(max_attempts, Duration::from_millis(5), Duration::from_millis(20)),
    )
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

#[tokio::test]
async fn test_throttled_then_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/author"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/author"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"works":[]}"#))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 4);
    let body = fetcher.fetch(&author_query("Neil Gaiman", 100)).await.unwrap();

    assert_eq!(&body[..], br#"{"works":[]}"#);
    assert_eq!(request_count(&server).await, 3);
    assert_eq!(fetcher.governor().stats().throttles, 2);
}

#[tokio::test]
async fn test_throttling_exhausts_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/author"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let result = fetcher.fetch(&author_query("Neil Gaiman", 100)).await;

    assert_eq!(result, Err(WarmError::RateLimited { attempts: 3 }));
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_status_mapping() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("name", "missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("name", "unavailable"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("name", "slow"))
        .respond_with(ResponseTemplate::new(408))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 4);

    let missing = fetcher.fetch(&author_query("Missing", 100)).await;
    assert!(matches!(missing, Err(WarmError::PermanentFetch(_))));

    let unavailable = fetcher.fetch(&author_query("Unavailable", 100)).await;
    match unavailable {
        Err(WarmError::TransientFetch(msg)) => assert!(msg.contains("try later")),
        other => panic!("expected transient error, got {:?}", other),
    }

    let slow = fetcher.fetch(&author_query("Slow", 100)).await;
    assert!(matches!(slow, Err(WarmError::TransientFetch(_))));

    // Non-429 failures are never retried inside the fetcher
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_retry_after_is_honored() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let start = Instant::now();
    fetcher.fetch(&author_query("Neil Gaiman", 100)).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_search_client_sends_canonical_params() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/author"))
        .and(query_param("name", "neil gaiman"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"docs":[{"title":"Coraline"},{"title":"Good Omens"},{"title":"coraline"}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/title"))
        .and(query_param("title", "coraline"))
        .and(query_param("maxresults", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"results":[]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let client = SearchClient::new(fetcher_for(&server, 3), 100, 20);

    let author = client.search_author("  Neil Gaiman ").await.unwrap();
    assert_eq!(author.key, "search:author:limit=100&name=neil gaiman");
    assert_eq!(author.bibliography.works_count(), 3);
    assert_eq!(author.bibliography.distinct_titles(100), vec!["Coraline", "Good Omens"]);

    let title = client.search_title("Coraline").await.unwrap();
    assert_eq!(title.key, "search:title:maxresults=20&title=coraline");
    assert_eq!(&title.payload[..], br#"{"results":[]}"#);
}

#[tokio::test]
async fn test_unreadable_bibliography_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = SearchClient::new(fetcher_for(&server, 3), 100, 20);
    let result = client.search_author("Neil Gaiman").await;

    assert!(matches!(result, Err(WarmError::PermanentFetch(_))));
}

#[tokio::test]
async fn test_connection_failure_is_transient() {
    let transport = HttpTransport::new(
        "http://127.0.0.1:1/search/author",
        "http://127.0.0.1:1/search/title",
        Duration::from_secs(2),
    )
    .unwrap();
    let fetcher = RateLimitedFetcher::new(
        Arc::new(transport),
        Arc::new(RateGovernor::unlimited()),
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
    );

    let result = fetcher.fetch(&author_query("Neil Gaiman", 100)).await;
    assert!(matches!(result, Err(WarmError::TransientFetch(_))));
}
