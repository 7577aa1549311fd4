//! `POST /events` end to end: token enforcement and action filtering
//! (§4.5, §8 scenario 4).

mod common;
use common::build_test_app;

use axum_test::TestServer;
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn push_event_without_configured_token_is_accepted(pool: PgPool) {
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/events")
        .json(&json!({
            "Events": [
                {"Action": "push", "Target": {"Repository": "a/x"}},
            ]
        }))
        .await;

    response.assert_status_ok();
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn missing_bearer_token_is_rejected_when_configured(pool: PgPool) {
    let (router, _state) = build_test_app(pool, Some("s3cr3t"));
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/events")
        .json(&json!({"Events": []}))
        .await;

    response.assert_status_unauthorized();
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn correct_bearer_token_is_accepted(pool: PgPool) {
    let (router, _state) = build_test_app(pool, Some("s3cr3t"));
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/events")
        .authorization_bearer("s3cr3t")
        .json(&json!({"Events": []}))
        .await;

    response.assert_status_ok();
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn malformed_body_is_rejected(pool: PgPool) {
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let response = server.post("/events").text("not json").await;
    response.assert_status_bad_request();
}
