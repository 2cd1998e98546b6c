//! REST integration tests
//!
//! Run the real reqwest transport and rate limiter against the mock REST
//! server.
//!
//! Run with: `cargo test -p integration-tests --test rest_tests`

use integration_tests::*;
use serde_json::json;
use shardline_common::Snowflake;
use shardline_rest::{Method, RestClient, RestError, RestRequest};
use std::time::Duration;

async fn setup() -> (MockRest, RestClient) {
    let server = MockRest::start().await.unwrap();
    let client = RestClient::new(&rest_config(&server.base_url())).unwrap();
    (server, client)
}

fn exhausted(reset_after: &str) -> MockResponse {
    MockResponse::ok(json!({"id": "1"}))
        .header("X-RateLimit-Limit", "5")
        .header("X-RateLimit-Remaining", "0")
        .header("X-RateLimit-Reset-After", reset_after)
}

#[tokio::test]
async fn test_get_gateway_bot_sends_auth_headers() {
    let (server, client) = setup().await;
    server.script("/gateway/bot", MockResponse::ok(gateway_bot(4)));

    let bot = client.get_gateway_bot().await.unwrap();
    assert_eq!(bot.shards, 4);
    assert_eq!(bot.session_start_limit.max_concurrency, 1);

    let calls = server.calls_to("/gateway/bot");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "GET");
    assert_eq!(
        calls[0].authorization.as_deref(),
        Some(format!("Bot {TEST_TOKEN}").as_str())
    );
    assert!(calls[0]
        .user_agent
        .as_deref()
        .is_some_and(|ua| ua.starts_with("DiscordBot")));
}

#[tokio::test]
async fn test_create_message_sends_json() {
    let (server, client) = setup().await;

    client
        .create_message(Snowflake::new(10), "hello")
        .await
        .unwrap();

    let calls = server.calls_to("/channels/10/messages");
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_exhausted_bucket_waits_and_other_buckets_do_not() {
    let (server, client) = setup().await;
    server.script("/channels/1/messages", exhausted("0.3"));

    client
        .request(RestRequest::get("/channels/1/messages"))
        .await
        .unwrap();

    let same_bucket = client.request(RestRequest::get("/channels/1/messages"));
    let other_bucket = client.request(RestRequest::get("/channels/2/messages"));
    let (same, other) = tokio::join!(same_bucket, other_bucket);
    same.unwrap();
    other.unwrap();

    let first = server.calls_to("/channels/1/messages")[0].at;
    let second = server.calls_to("/channels/1/messages")[1].at;
    let independent = server.calls_to("/channels/2/messages")[0].at;

    assert!(second - first >= Duration::from_millis(290));
    assert!(independent - first < Duration::from_millis(250));
}

#[tokio::test]
async fn test_global_rate_limit_pauses_all_buckets() {
    let (server, client) = setup().await;
    server.script(
        "/channels/1/messages",
        MockResponse::status(429)
            .header("Retry-After", "0.3")
            .header("X-RateLimit-Global", "true"),
    );

    let limited = client.limiter().submit(RestRequest::get("/channels/1/messages"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.limiter().global_paused_until().is_some());

    let other = client.limiter().submit(RestRequest::get("/guilds/9/members"));
    let (limited, other) = tokio::join!(limited, other);
    limited.unwrap();
    other.unwrap();

    let limited_calls = server.calls_to("/channels/1/messages");
    assert_eq!(limited_calls.len(), 2);
    let other_at = server.calls_to("/guilds/9/members")[0].at;
    assert!(other_at - limited_calls[0].at >= Duration::from_millis(290));
}

#[tokio::test]
async fn test_edits_apply_in_submission_order() {
    let (server, client) = setup().await;

    let pending: Vec<_> = (1..=5)
        .map(|id| {
            client.limiter().submit(
                RestRequest::new(Method::PATCH, format!("/channels/3/messages/{id}"))
                    .with_body(json!({"content": format!("edit {id}")})),
            )
        })
        .collect();
    for response in pending {
        response.await.unwrap();
    }

    let paths: Vec<String> = server.calls().into_iter().map(|c| c.path).collect();
    let expected: Vec<String> = (1..=5).map(|id| format!("/channels/3/messages/{id}")).collect();
    assert_eq!(paths, expected);
}

#[tokio::test]
async fn test_server_error_does_not_stall_bucket() {
    let (server, client) = setup().await;
    server.script("/channels/1/messages", MockResponse::status(502));

    let first = client.limiter().submit(RestRequest::get("/channels/1/messages"));
    let second = client.limiter().submit(RestRequest::get("/channels/1/messages"));

    let err = first.await.unwrap_err();
    assert!(matches!(err, RestError::Http { status: 502, .. }));
    assert!(err.is_retryable());
    assert_eq!(second.await.unwrap().status, 200);
}

#[tokio::test]
async fn test_unauthorized_surfaces_as_fatal() {
    let (server, client) = setup().await;
    server.script("/gateway/bot", MockResponse::status(401));

    let err = client.get_gateway_bot().await.unwrap_err();
    assert!(matches!(err, RestError::Unauthorized));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_transport_failure_surfaces() {
    // Nothing listens on the discard port
    let client = RestClient::new(&rest_config("http://127.0.0.1:9/api/v10")).unwrap();

    let err = client.get_gateway_bot().await.unwrap_err();
    assert!(matches!(err, RestError::Transport(_)));
}
