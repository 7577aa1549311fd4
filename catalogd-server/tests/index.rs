//! `GET /index`: query parameters, JSON body shape, and ETag/304 behavior
//! (§4.5, §8 scenarios 1-3).

mod common;
use common::build_test_app;

use axum_test::TestServer;
use catalogd_core::model::{Image, MetadataMap};
use catalogd_core::storage::Tx;
use sqlx::PgPool;

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
async fn ingested_image_is_returned_with_sorted_tags(pool: PgPool) {
    seed_image(&pool, "r", &["latest", "v1"], "sha256:aa").await;
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let response = server.get("/index").add_query_param("repository", "r").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let results = body["Results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["name"], "r");
    assert_eq!(results[0]["images"][0]["tags"], serde_json::json!(["latest", "v1"]));
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn repository_filter_narrows_to_matching_repos(pool: PgPool) {
    seed_image(&pool, "a/x", &["latest"], "sha256:aa").await;
    seed_image(&pool, "b/y", &["latest"], "sha256:bb").await;
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let both = server
        .get("/index")
        .add_query_param("repository", "a/x")
        .add_query_param("repository", "b/y")
        .await
        .json::<serde_json::Value>();
    assert_eq!(both["Results"].as_array().unwrap().len(), 2);

    let one = server
        .get("/index")
        .add_query_param("repository", "a/x")
        .await
        .json::<serde_json::Value>();
    assert_eq!(one["Results"].as_array().unwrap().len(), 1);
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn repeat_request_with_etag_gets_304(pool: PgPool) {
    seed_image(&pool, "r", &["latest"], "sha256:aa").await;
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let first = server.get("/index").add_query_param("repository", "r").await;
    first.assert_status_ok();
    let etag = first.header("etag").to_str().unwrap().to_string();

    let second = server
        .get("/index")
        .add_query_param("repository", "r")
        .add_header("If-None-Match", &etag)
        .await;
    second.assert_status(axum::http::StatusCode::NOT_MODIFIED);
}

#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]
async fn static_index_sets_max_age_cache_control(pool: PgPool) {
    seed_image(&pool, "r", &["latest"], "sha256:aa").await;
    let (router, _state) = build_test_app(pool, None);
    let server = TestServer::new(router).unwrap();

    let response = server.get("/index/static").await;
    let cache_control = response.header("cache-control").to_str().unwrap().to_string();
    assert!(cache_control.starts_with("max-age="));
}
