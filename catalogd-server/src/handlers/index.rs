//! `GET /index` and `GET /index/static` (§4.5, §4.7): parse query
//! parameters into the query model, execute it, and honor `ETag` /
//! `Cache-Control`. The two routes share everything but the
//! `Cache-Control` policy (§9).

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalogd_core::query::{Query, QueryBuilder};
use catalogd_core::{etag, storage};
use serde::Serialize;
use url::form_urlencoded;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct IndexResponse {
    registry: String,
    results: Vec<catalogd_core::Repository>,
}

/// `GET /index`: `Cache-Control: no-store` (always re-validate).
pub async fn dynamic(state: State<AppState>, headers: HeaderMap, query: RawQuery) -> Response {
    match handle(&state, &headers, &query).await {
        Ok(mut response) => {
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
            response
        }
        Err(error) => error.into_response(),
    }
}

/// `GET /index/static`: `Cache-Control: max-age=<configured>`.
pub async fn static_index(state: State<AppState>, headers: HeaderMap, query: RawQuery) -> Response {
    match handle(&state, &headers, &query).await {
        Ok(mut response) => {
            let value = format!("max-age={}", state.config.index_max_age_seconds);
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, value.parse().unwrap());
            response
        }
        Err(error) => error.into_response(),
    }
}

async fn handle(state: &AppState, headers: &HeaderMap, query: &RawQuery) -> AppResult<Response> {
    let parsed = parse_index_query(query.0.as_deref().unwrap_or(""))?;

    let modification_time = storage::modification_time(&state.pool).await?;
    let tag = format!("\"{}-{}\"", state.build_id, modification_time.to_rfc3339());

    if let Some(header_value) = headers.get(header::IF_NONE_MATCH) {
        let raw = header_value
            .to_str()
            .map_err(|_| AppError::bad_request("malformed If-None-Match header"))?;
        let candidates = etag::parse_if_none_match(raw)
            .map_err(|error| AppError::bad_request(error.to_string()))?;
        if etag::if_none_match(&candidates, &tag) {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            response
                .headers_mut()
                .insert(header::ETAG, tag.parse().unwrap());
            return Ok(response);
        }
    }

    let results = storage::do_query(&state.pool, &parsed).await?;
    let body = IndexResponse {
        registry: state.config.registry_public_url.clone(),
        results,
    };

    let mut response = Json(body).into_response();
    response
        .headers_mut()
        .insert(header::ETAG, tag.parse().unwrap());
    Ok(response)
}

/// Parses `/index`'s query parameters (§6) into a [`Query`]: `repository`,
/// `tag`, `tag:matches`, `os`, `architecture`, and `annotation:<key>` /
/// `label:<key>`, each optionally suffixed `:exists` or `:matches`.
fn parse_index_query(raw: &str) -> AppResult<Query> {
    let mut builder = QueryBuilder::new();

    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        builder = match key.as_ref() {
            "repository" => builder.repository(value.into_owned()),
            "tag" => builder.tag(value.into_owned()),
            "tag:matches" => builder.tag_matches(value.into_owned()),
            "os" => builder.os(value.into_owned()),
            "architecture" => builder.architecture(value.into_owned()),
            _ => apply_map_param(builder, &key, &value)?,
        };
    }

    Ok(builder.build())
}

fn apply_map_param(builder: QueryBuilder, key: &str, value: &str) -> AppResult<QueryBuilder> {
    let mut parts = key.splitn(3, ':');
    let kind = parts.next().unwrap_or_default();
    let field = parts.next();
    let modifier = parts.next();

    let field = match field {
        Some(field) => field,
        None => return Err(AppError::bad_request(format!("unknown query parameter: {key}"))),
    };

    match kind {
        "annotation" => Ok(match modifier {
            None => builder.annotation_is(field, value.to_string()),
            Some("exists") => builder.annotation_exists(field),
            Some("matches") => builder.annotation_matches(field, value.to_string()),
            Some(other) => {
                return Err(AppError::bad_request(format!(
                    "unknown annotation modifier: {other}"
                )))
            }
        }),
        "label" => Ok(match modifier {
            None => builder.label_is(field, value.to_string()),
            Some("exists") => builder.label_exists(field),
            Some("matches") => builder.label_matches(field, value.to_string()),
            Some(other) => {
                return Err(AppError::bad_request(format!(
                    "unknown label modifier: {other}"
                )))
            }
        }),
        _ => Err(AppError::bad_request(format!(
            "unknown query parameter: {key}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalogd_core::query::Term;

    #[test]
    fn parses_scalar_and_map_params() {
        let query = parse_index_query(
            "repository=a%2Fx&tag=latest&tag:matches=v*&os=linux&annotation:org.example=demo",
        )
        .unwrap();
        assert_eq!(query.repository, vec![Term::Is("a/x".to_string())]);
        assert_eq!(
            query.tag,
            vec![Term::Is("latest".to_string()), Term::Matches("v*".to_string())]
        );
        assert_eq!(query.os, vec![Term::Is("linux".to_string())]);
        assert_eq!(
            query.annotations.get("org.example"),
            Some(&vec![Term::Is("demo".to_string())])
        );
    }

    #[test]
    fn parses_exists_and_matches_modifiers() {
        let query = parse_index_query("label:tier:exists=1&label:tier:matches=pro*").unwrap();
        assert_eq!(
            query.labels.get("tier"),
            Some(&vec![Term::Exists, Term::Matches("pro*".to_string())])
        );
    }

    #[test]
    fn rejects_unknown_parameter() {
        assert!(parse_index_query("bogus=1").is_err());
    }

    #[test]
    fn rejects_unknown_modifier() {
        assert!(parse_index_query("annotation:k:frobnicate=1").is_err());
    }

    #[test]
    fn empty_query_string_is_empty_query() {
        assert!(parse_index_query("").unwrap().is_empty());
    }
}
