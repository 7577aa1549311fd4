//! Shared test-app wiring: builds a router against a migrated test
//! database without starting the scheduler or a real registry client,
//! mirroring the teacher's `tests/common.rs` `build_test_app_with_hooks`
//! helper.

use std::sync::Arc;
use std::time::Duration;

use catalogd_core::registry::FakeRegistryClient;
use catalogd_core::ChangeBroadcaster;
use catalogd_server::config::Config;
use catalogd_server::handlers;
use catalogd_server::state::AppState;
use sqlx::PgPool;

/// Builds a router plus its [`AppState`] over `pool`. The fetch pipeline
/// is wired to an empty [`FakeRegistryClient`] so `/events` can enqueue
/// requests without a worker ever reaching real network I/O; tests that
/// need data in the store write it directly through `catalogd_core::storage`.
pub fn build_test_app(pool: PgPool, events_token: Option<&str>) -> (axum::Router, AppState) {
    let broadcaster = Arc::new(ChangeBroadcaster::new());
    let registry: Arc<dyn catalogd_core::registry::RegistryClient> =
        Arc::new(FakeRegistryClient::new());
    let fetch = catalogd_core::fetch::spawn(registry, pool.clone(), broadcaster.clone(), 2, 16);

    let config = Config {
        listen_addr: "127.0.0.1:0".to_string(),
        registry_url: "http://fake-registry.invalid".to_string(),
        registry_public_url: "fake-registry.invalid".to_string(),
        events_token: events_token.map(str::to_string),
        database_url: String::new(),
        index_max_age_seconds: 60,
        fetch_all_interval: Duration::from_secs(3600),
        garbage_collect_interval: Duration::from_secs(3600),
    };

    let state = AppState {
        pool,
        broadcaster,
        fetch,
        config: Arc::new(config),
        build_id: Arc::from("test-build"),
    };

    let router = handlers::router().with_state(state.clone());
    (router, state)
}
