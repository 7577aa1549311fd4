//! `POST /assert?timeout=<seconds>`: long-poll assertion evaluation
//! (§4.5). Runs the query; if every assertion already holds, replies
//! immediately. Otherwise it waits on the change broadcaster for the
//! remaining deadline and re-evaluates on each wake, until either every
//! assertion holds or the deadline elapses.

use std::time::{Duration, Instant};

use axum::extract::{Query as QueryExtractor, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalogd_core::{etag, storage};
use catalogd_core::query::Query;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AssertParams {
    pub timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum AssertionKind {
    Contains,
    NotContains,
}

#[derive(Debug, Deserialize)]
struct Assertion {
    #[serde(rename = "Type")]
    kind: AssertionKind,
    #[serde(rename = "Test")]
    test: Value,
}

#[derive(Debug, Deserialize)]
struct AssertRequest {
    #[serde(rename = "Query")]
    query: Query,
    #[serde(rename = "Assertions")]
    assertions: Vec<Assertion>,
}

pub async fn assert_handler(
    State(state): State<AppState>,
    QueryExtractor(params): QueryExtractor<AssertParams>,
    Json(body): Json<AssertRequest>,
) -> Response {
    let deadline = Instant::now() + Duration::from_secs_f64(params.timeout.unwrap_or(0.0).max(0.0));
    let mut token = state.broadcaster.current();

    loop {
        let results = match storage::do_query(&state.pool, &body.query).await {
            Ok(results) => results,
            Err(error) => return AppError::from(error).into_response(),
        };
        let results_json = match serde_json::to_value(&results) {
            Ok(value) => value,
            Err(error) => return AppError::internal(error.to_string()).into_response(),
        };

        let failures: Vec<String> = body
            .assertions
            .iter()
            .filter_map(|assertion| {
                let holds = match assertion.kind {
                    AssertionKind::Contains => etag::contains(&results_json, &assertion.test),
                    AssertionKind::NotContains => !etag::contains(&results_json, &assertion.test),
                };
                if holds {
                    None
                } else {
                    Some(describe(assertion))
                }
            })
            .collect();

        if failures.is_empty() {
            return (
                StatusCode::OK,
                Json(serde_json::json!({
                    "Success": true,
                    "Results": results_json,
                    "Failures": Vec::<String>::new(),
                })),
            )
                .into_response();
        }

        let now = Instant::now();
        if now >= deadline {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "Success": false,
                    "Results": results_json,
                    "Failures": failures,
                })),
            )
                .into_response();
        }

        let (new_token, woke) = state
            .broadcaster
            .wait_timeout(token, deadline - now)
            .await;
        if woke {
            token = new_token;
        }
    }
}

fn describe(assertion: &Assertion) -> String {
    let verb = match assertion.kind {
        AssertionKind::Contains => "contains",
        AssertionKind::NotContains => "not-contains",
    };
    format!("{verb} {}", assertion.test)
}
