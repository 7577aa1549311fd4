//! `POST /events`: the registry notification sink (§4.5, §6).

use axum::extract::State;
use axum::http::{header, StatusCode};
use catalogd_core::FetchRequest;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    #[serde(rename = "Events")]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Target")]
    target: Target,
}

#[derive(Debug, Deserialize)]
struct Target {
    #[serde(rename = "Repository")]
    repository: String,
}

pub async fn events(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> AppResult<StatusCode> {
    authorize(&state, &request)?;

    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|error| AppError::bad_request(error.to_string()))?;
    let envelope: NotificationEnvelope = serde_json::from_slice(&bytes)
        .map_err(|error| AppError::bad_request(format!("malformed notification body: {error}")))?;

    for event in envelope.events {
        match event.action.as_str() {
            "push" | "delete" => {
                state
                    .fetch
                    .send(FetchRequest::FetchRepository {
                        name: event.target.repository,
                        low_priority: false,
                    })
                    .await;
            }
            other => {
                tracing::debug!(action = other, "ignoring notification with unhandled action");
            }
        }
    }

    Ok(StatusCode::OK)
}

fn authorize(state: &AppState, request: &axum::extract::Request) -> AppResult<()> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if bearer_token_ok(state.config.events_token.as_deref(), header_value) {
        Ok(())
    } else {
        Err(AppError::unauthorized("invalid or missing bearer token"))
    }
}

/// No token configured disables auth entirely (§4.5). Otherwise the
/// `Authorization` header must be exactly `Bearer <token>`.
fn bearer_token_ok(expected: Option<&str>, header_value: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    header_value
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|provided| provided == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_configured_token_allows_any_request() {
        assert!(bearer_token_ok(None, None));
        assert!(bearer_token_ok(None, Some("Bearer whatever")));
    }

    #[test]
    fn matching_bearer_token_is_accepted() {
        assert!(bearer_token_ok(Some("secret"), Some("Bearer secret")));
    }

    #[test]
    fn missing_or_wrong_token_is_rejected() {
        assert!(!bearer_token_ok(Some("secret"), None));
        assert!(!bearer_token_ok(Some("secret"), Some("Bearer wrong")));
        assert!(!bearer_token_ok(Some("secret"), Some("secret")));
    }
}
