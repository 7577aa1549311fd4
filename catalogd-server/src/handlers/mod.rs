//! HTTP surface: one module per endpoint (§4.5).

pub mod assert;
pub mod events;
pub mod home;
pub mod index;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home::home))
        .route("/events", post(events::events))
        .route("/index", get(index::dynamic))
        .route("/index/static", get(index::static_index))
        .route("/assert", post(assert::assert_handler))
}
