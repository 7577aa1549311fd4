//! ETag/cache glue (§4.5, §4.7 in spirit): `If-None-Match` token-list
//! parsing and the JSON-containment relation the assertion endpoint
//! evaluates against. Small, but cross-cutting — both the storage layer's
//! modification marker and the HTTP layer's response headers depend on it.

use serde_json::Value;
use thiserror::Error;

/// A single entity-tag as it appears in an `If-None-Match` header: either
/// the wildcard `*`, or a strong/weak tag carrying its original quoted
/// text (comparisons are by that text, matching RFC 7232 §2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTag {
    Any,
    Tag(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IfNoneMatchError {
    #[error("malformed If-None-Match token: {0:?}")]
    Malformed(String),
}

/// Parses an `If-None-Match` header value into its list of entity-tags,
/// per §8's testable property table: comma-separated, optionally
/// surrounded by whitespace, each token either `*`, a quoted string
/// (`"..."`, escaped quotes allowed), or `W/` followed by a quoted string.
pub fn parse_if_none_match(header: &str) -> Result<Vec<EntityTag>, IfNoneMatchError> {
    let mut tags = Vec::new();
    for raw in header.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        if token == "*" {
            tags.push(EntityTag::Any);
            continue;
        }
        let body = token.strip_prefix("W/").unwrap_or(token);
        if !is_quoted_string(body) {
            return Err(IfNoneMatchError::Malformed(token.to_string()));
        }
        tags.push(EntityTag::Tag(token.to_string()));
    }
    Ok(tags)
}

/// `body` must be a double-quoted string, allowing backslash-escaped
/// characters (including escaped quotes) inside.
fn is_quoted_string(body: &str) -> bool {
    let bytes = body.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return false;
    }
    let inner = &body[1..body.len() - 1];
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if chars.next().is_none() {
                return false;
            }
        } else if c == '"' {
            return false;
        }
    }
    true
}

/// Whether `candidates` (a parsed `If-None-Match` list) matches `etag` (the
/// response's own quoted tag, e.g. `"abc-123"`), per RFC 7232 §2.3's weak
/// comparison rule used for `GET`: a `W/` prefix is ignored for matching.
pub fn if_none_match(candidates: &[EntityTag], etag: &str) -> bool {
    candidates.iter().any(|tag| match tag {
        EntityTag::Any => true,
        EntityTag::Tag(t) => strip_weak(t) == strip_weak(etag),
    })
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Recursive JSON-containment relation used by `/assert` (§4.5):
///   - object `a` contains object `b` iff every key of `b` is present in
///     `a` and `a[k]` contains `b[k]`;
///   - array `a` contains array `b` iff every element of `b` is
///     contained-by some element of `a`;
///   - scalars contain iff equal;
///   - otherwise: false.
pub fn contains(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => b
            .iter()
            .all(|(k, bv)| a.get(k).is_some_and(|av| contains(av, bv))),
        (Value::Array(a), Value::Array(b)) => {
            b.iter().all(|bv| a.iter().any(|av| contains(av, bv)))
        }
        (a, b) if a.is_object() || a.is_array() || b.is_object() || b.is_array() => false,
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_spec_examples() {
        let parsed = parse_if_none_match(r#""foo",*,W/"bar""#).unwrap();
        assert_eq!(
            parsed,
            vec![
                EntityTag::Tag("\"foo\"".to_string()),
                EntityTag::Any,
                EntityTag::Tag("W/\"bar\"".to_string()),
            ]
        );

        let parsed = parse_if_none_match(r#","foo",,"bar","#).unwrap();
        assert_eq!(
            parsed,
            vec![
                EntityTag::Tag("\"foo\"".to_string()),
                EntityTag::Tag("\"bar\"".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_unquoted_tokens() {
        assert!(parse_if_none_match("foo").is_err());
        assert!(parse_if_none_match("\"foo").is_err());
    }

    #[test]
    fn containment_is_reflexive_and_transitive() {
        let v = json!({"a": 1, "b": {"c": [1, 2, 3]}});
        assert!(contains(&v, &v));

        let a = json!({"a": 1, "b": 2, "c": 3});
        let b = json!({"a": 1, "b": 2});
        let c = json!({"a": 1});
        assert!(contains(&a, &b));
        assert!(contains(&b, &c));
        assert!(contains(&a, &c));
    }

    #[test]
    fn empty_object_is_contained_by_anything() {
        assert!(contains(&json!({"a": 1}), &json!({})));
    }

    #[test]
    fn extra_keys_in_needle_fail_containment() {
        assert!(!contains(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }
}
