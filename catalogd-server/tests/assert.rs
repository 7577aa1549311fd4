//! `POST /assert`: long-poll assertion evaluation (§4.5, §8 scenario 5).

mod common;
use common::build_test_app;

use axum_test::TestServer;
use catalogd_core::model::{Image, MetadataMap};
use catalogd_core::storage::Tx;
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;

async fn seed_image(pool: &PgPool, repository: &str, tags: &[&str], digest: &str) {
    let mut tx = Tx::begin(pool).await.unwrap();
    tx.store_image(&Image {
        digest: digest.to_string(),
        media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
        os: Some("linux".to_string()),
        architecture: Some("amd64".to_string()),
        annotations: MetadataMap::new(),
        labels: MetadataMap::new(),
    })
    .await
    .unwrap();
    for tag in tags {
        tx.upsert_image_tag(repository, tag, digest).await.unwrap();
    }
    tx.commit().await.unwrap();
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn assertion_already_true_returns_immediately(pool: PgPool) {
    seed_image(&pool, "a/x", &["latest"], "sha256:aa").await;
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/assert")
        .json(&json!({
            "Query": {},
            "Assertions": [
                {"Type": "contains", "Test": [{"name": "a/x"}]},
            ],
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["Success"], true);
    assert!(body["Failures"].as_array().unwrap().is_empty());
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn unmet_assertion_times_out_with_bad_request(pool: PgPool) {
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/assert")
        .add_query_param("timeout", "0")
        .json(&json!({
            "Query": {},
            "Assertions": [
                {"Type": "contains", "Test": [{"name": "a/x"}]},
            ],
        }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["Success"], false);
    assert_eq!(body["Failures"].as_array().unwrap().len(), 1);
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn concurrent_ingest_wakes_a_waiting_assertion(pool: PgPool) {
    let (router, state) = build_test_app(pool.clone(), None);
    let server = TestServer::new(router).unwrap();

    let waiter = tokio::spawn(async move {
        server
            .post("/assert")
            .add_query_param("timeout", "5")
            .json(&json!({
                "Query": {},
                "Assertions": [
                    {"Type": "contains", "Test": [{"name": "a/x"}]},
                ],
            }))
            .await
    });

    // Give the handler a moment to register on the broadcaster before the
    // ingest that should wake it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    seed_image(&pool, "a/x", &["latest"], "sha256:aa").await;
    state.broadcaster.notify();

    let response = waiter.await.unwrap();
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["Success"], true);
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn not_contains_holds_on_empty_store(pool: PgPool) {
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/assert")
        .json(&json!({
            "Query": {},
            "Assertions": [
                {"Type": "not-contains", "Test": [{"name": "a/x"}]},
            ],
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["Success"], true);
}
