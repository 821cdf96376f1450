//! Integration tests for the resilient transport against a mock upstream.

use std::time::Duration;

use assert_matches::assert_matches;
use tunebridge::config::{ProviderConfig, ProviderKind};
use tunebridge::transport::{build_transport, get_json};
use tunebridge::RequestContext;
use tunebridge_common::Error;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, retries: u32) -> ProviderConfig {
    let mut config = ProviderConfig::new("mock", ProviderKind::Unm, server.uri());
    config.retry_count = retries;
    config.retry_delay_ms = 10;
    config
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retries_transient_failures_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = build_transport(&config(&server, 3)).unwrap();
    let body = transport
        .get(&RequestContext::new(), &format!("{}/flaky", server.uri()), &[])
        .await
        .unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn gives_up_after_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let transport = build_transport(&config(&server, 1)).unwrap();
    let res = transport
        .get(&RequestContext::new(), &format!("{}/down", server.uri()), &[])
        .await;
    assert_matches!(
        res,
        Err(Error::TransientNetwork {
            status: Some(503),
            ..
        })
    );
}

#[tokio::test]
async fn retries_rate_limited_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let transport = build_transport(&config(&server, 1)).unwrap();
    assert!(transport
        .get(&RequestContext::new(), &server.uri(), &[])
        .await
        .is_ok());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = build_transport(&config(&server, 3)).unwrap();
    let res = transport
        .get(&RequestContext::new(), &server.uri(), &[])
        .await;
    assert_matches!(res, Err(Error::Provider(_)));
}

#[tokio::test]
async fn decode_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = build_transport(&config(&server, 3)).unwrap();
    let res: Result<serde_json::Value, _> =
        get_json(transport.as_ref(), &RequestContext::new(), &server.uri(), &[]).await;
    assert_matches!(res, Err(Error::Provider(_)));
}

// ---------------------------------------------------------------------------
// Request shaping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn injects_identity_headers_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("name", "晴天"))
        .and(header("user-agent", "tunebridge-test/1.0"))
        .and(header("cookie", "MUSIC_U=abc"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server, 0);
    config.user_agent = "tunebridge-test/1.0".into();
    config.cookie = Some("MUSIC_U=abc".into());
    config.api_key = Some("secret".into());

    let transport = build_transport(&config).unwrap();
    let body = transport
        .get(
            &RequestContext::new(),
            &format!("{}/search", server.uri()),
            &[("name", "晴天".to_string())],
        )
        .await
        .unwrap();
    assert_eq!(&body[..], b"[]");
}

#[tokio::test]
async fn slow_upstream_times_out_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut config = config(&server, 0);
    config.timeout_secs = 1;

    let transport = build_transport(&config).unwrap();
    let res = transport
        .get(&RequestContext::new(), &server.uri(), &[])
        .await;
    assert_matches!(res, Err(Error::TransientNetwork { status: None, .. }));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_context_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let transport = build_transport(&config(&server, 3)).unwrap();
    let ctx = RequestContext::new();
    ctx.cancel();
    let res = transport.get(&ctx, &server.uri(), &[]).await;
    assert_matches!(res, Err(Error::Cancelled));
}

#[tokio::test]
async fn deadline_cuts_retry_loop_short() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = config(&server, 10);
    config.retry_delay_ms = 200;

    let transport = build_transport(&config).unwrap();
    let ctx = RequestContext::new().with_timeout(Duration::from_millis(300));
    let started = std::time::Instant::now();
    let res = transport.get(&ctx, &server.uri(), &[]).await;

    assert_matches!(res, Err(Error::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(2));
}
