//! `catalogd`: index-and-query service for a remote container registry.
//!
//! Assembles, in order: CLI args, layered config, tracing, the Postgres
//! pool and migrations, the change broadcaster and fetch pipeline, the
//! scheduler, and the axum router (§10.5).

use std::sync::Arc;

use anyhow::Context;
use catalogd_core::registry::HttpRegistryClient;
use catalogd_core::{fetch, ChangeBroadcaster};
use catalogd_server::config::{Args, Config};
use catalogd_server::state::AppState;
use catalogd_server::{build_id, handlers, scheduler};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Best-effort: a missing `.env` is not an error, matching the
    // teacher's optional-env-file convention.
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing();

    let config = Config::load(&args).context("loading configuration")?;

    let pool = catalogd_core::storage::connect(&config.database_url)
        .await
        .context("connecting to database and running migrations")?;

    let broadcaster = Arc::new(ChangeBroadcaster::new());
    let registry: Arc<dyn catalogd_core::registry::RegistryClient> =
        Arc::new(HttpRegistryClient::new(config.registry_url.clone()));

    let fetch_handle = fetch::spawn(
        registry,
        pool.clone(),
        broadcaster.clone(),
        fetch::DEFAULT_WORKER_COUNT,
        fetch::DEFAULT_CHANNEL_CAPACITY,
    );

    scheduler::spawn(
        fetch_handle.clone(),
        config.fetch_all_interval,
        config.garbage_collect_interval,
    );

    let state = AppState {
        pool,
        broadcaster,
        fetch: fetch_handle,
        config: Arc::new(config.clone()),
        build_id: Arc::from(build_id::compute()),
    };

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "catalogd listening");

    axum::serve(listener, app)
        .await
        .context("serving http")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
