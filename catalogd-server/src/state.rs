//! Shared handler state, built once in `main` and cloned per request.

use std::fmt;
use std::sync::Arc;

use catalogd_core::{ChangeBroadcaster, FetchHandle};
use sqlx::PgPool;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub broadcaster: Arc<ChangeBroadcaster>,
    pub fetch: FetchHandle,
    pub config: Arc<Config>,
    pub build_id: Arc<str>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
