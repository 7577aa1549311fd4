//! `GET /`: a minimal HTML summary page (§4.5's "embedded static
//! template" — §1 explicitly scopes real template rendering out).

use axum::extract::State;
use axum::response::Html;

use crate::error::AppResult;
use crate::state::AppState;

const TEMPLATE: &str = include_str!("../../templates/home.html");

pub async fn home(State(state): State<AppState>) -> AppResult<Html<String>> {
    let modification_time = catalogd_core::storage::modification_time(&state.pool).await?;
    let body = TEMPLATE
        .replace("{{registry}}", &state.config.registry_public_url)
        .replace("{{modification_time}}", &modification_time.to_rfc3339());
    Ok(Html(body))
}
