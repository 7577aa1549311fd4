//! Compiles a [`Query`] into a parameterized SQL `WHERE` clause (§4.4).
//!
//! Two independent compilations are needed per query — one against the
//! `image` table, one against `list` — because `list` has no `os`,
//! `architecture`, or `labels` columns. [`Target`] selects which.

use serde_json::json;

use crate::error::{CatalogError, Result};
use crate::query::model::{Query, Term};

/// Which table a compilation targets. `List` drops `os`/`architecture`
/// groups (lists don't carry those columns) and treats any non-empty
/// `labels` group as unsatisfiable (lists have no label metadata — see
/// `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Image,
    List,
}

/// A single bound argument in a compiled query, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledArg {
    Text(String),
    Json(serde_json::Value),
}

/// The result of compilation: a `WHERE` clause body (without the `WHERE`
/// keyword; empty string means "no filter") and its bound arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compiled {
    pub where_clause: String,
    pub args: Vec<CompiledArg>,
}

struct Builder {
    args: Vec<CompiledArg>,
}

impl Builder {
    fn add_text(&mut self, value: String) -> String {
        self.args.push(CompiledArg::Text(value));
        format!("${}", self.args.len())
    }

    fn add_json(&mut self, value: serde_json::Value) -> String {
        self.args.push(CompiledArg::Json(value));
        format!("${}", self.args.len())
    }

    /// Scalar column subclause: `Is` -> `col = $n`, `Matches` -> `col LIKE
    /// $n`. `Exists` on a scalar column is a programmer error (§7).
    fn scalar_subclause(&mut self, column: &str, terms: &[Term]) -> Result<String> {
        let pieces: Vec<String> = terms
            .iter()
            .map(|term| match term {
                Term::Is(value) => Ok(format!("{column} = {}", self.add_text(value.clone()))),
                Term::Matches(glob) => Ok(format!(
                    "{column} LIKE {}",
                    self.add_text(like_pattern(glob))
                )),
                Term::Exists => Err(CatalogError::Programmer(format!(
                    "Exists term on scalar column {column}"
                ))),
            })
            .collect::<Result<_>>()?;
        Ok(or_join(&pieces))
    }

    /// Map column subclause for one key. `Is` -> `col @> $n` (containment);
    /// `Exists` -> `col ? $n` (key-existence); `Matches` ->
    /// `jsonb_object_field_text(col, $key) LIKE $pattern`.
    ///
    /// This is the corrected reading of the upstream implementation, which
    /// has `Is` and `Exists` swapped (see `DESIGN.md`).
    fn map_subclause(&mut self, column: &str, key: &str, terms: &[Term]) -> String {
        let pieces: Vec<String> = terms
            .iter()
            .map(|term| match term {
                Term::Is(value) => {
                    let obj = json!({ key: value });
                    format!("{column} @> {}", self.add_json(obj))
                }
                Term::Exists => format!("{column} ? {}", self.add_text(key.to_string())),
                Term::Matches(glob) => format!(
                    "jsonb_object_field_text({column}, {}) LIKE {}",
                    self.add_text(key.to_string()),
                    self.add_text(like_pattern(glob))
                ),
            })
            .collect();
        or_join(&pieces)
    }
}

/// Joins `pieces` with `OR`, parenthesizing when there's more than one.
/// Empty input yields `""`.
fn or_join(pieces: &[String]) -> String {
    match pieces.len() {
        0 => String::new(),
        1 => pieces[0].clone(),
        _ => format!("({})", pieces.join(" OR ")),
    }
}

/// Joins a sequence of already-OR-joined group subclauses (one per query
/// group) with `AND`, skipping empty/absent groups. `compile` uses this
/// directly since each of its pieces is already a complete group
/// subclause that must never be OR-merged with its neighbor.
fn and_join_groups(pieces: &[String]) -> String {
    pieces
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// The `flatten` algorithm from §8's testable properties: adjacent
/// non-empty pieces are OR-joined (and parenthesized when there's more
/// than one) into a group; an empty-string piece ends the current group
/// without contributing one of its own. The resulting groups are then
/// AND-joined.
pub fn flatten(pieces: &[String]) -> String {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for piece in pieces {
        if piece.is_empty() {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
        } else {
            current.push(piece.clone());
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    groups
        .into_iter()
        .map(|group| or_join(&group))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Translates a shell-style glob (`*`, `?`) into a SQL `LIKE` pattern,
/// escaping any literal `%`/`_` that appeared in the glob.
pub fn like_pattern(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    for ch in glob.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            other => out.push(other),
        }
    }
    out
}

/// Compiles `query` into a `WHERE`-clause body and its bound arguments for
/// `target`. Sub-queries are expected to additionally `ORDER BY repository`
/// (handled by the storage layer, not here) so that merging the image and
/// list result sets stays well-defined (§9).
pub fn compile(query: &Query, target: Target) -> Result<Compiled> {
    let mut builder = Builder { args: Vec::new() };
    let mut pieces = Vec::new();

    pieces.push(builder.scalar_subclause("repository", &query.repository)?);
    pieces.push(builder.scalar_subclause("tag", &query.tag)?);

    match target {
        Target::Image => {
            pieces.push(builder.scalar_subclause("os", &query.os)?);
            pieces.push(builder.scalar_subclause("architecture", &query.architecture)?);
        }
        Target::List => {
            if !query.os.is_empty() || !query.architecture.is_empty() {
                // `list` has no os/architecture columns: any such filter
                // excludes every list row outright.
                pieces.push("FALSE".to_string());
            }
        }
    }

    for (key, terms) in &query.annotations {
        if !terms.is_empty() {
            pieces.push(builder.map_subclause("annotations", key, terms));
        }
    }

    match target {
        Target::Image => {
            for (key, terms) in &query.labels {
                if !terms.is_empty() {
                    pieces.push(builder.map_subclause("labels", key, terms));
                }
            }
        }
        Target::List => {
            if query.labels.values().any(|terms| !terms.is_empty()) {
                // `list` has no labels column: a label filter excludes
                // every list row.
                pieces.push("FALSE".to_string());
            }
        }
    }

    Ok(Compiled {
        where_clause: and_join_groups(&pieces),
        args: builder.args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::model::QueryBuilder;

    #[test]
    fn flatten_matches_spec_table() {
        let a = "A".to_string();
        let b = "B".to_string();
        let c = "C".to_string();
        let empty = String::new();

        assert_eq!(flatten(&[]), "");
        assert_eq!(flatten(&[a.clone()]), "A");
        assert_eq!(flatten(&[a.clone(), b.clone()]), "(A OR B)");
        assert_eq!(flatten(&[a.clone(), empty.clone(), b.clone()]), "A AND B");
        assert_eq!(
            flatten(&[a.clone(), b.clone(), empty.clone(), c.clone()]),
            "(A OR B) AND C"
        );
        assert_eq!(
            flatten(&[a.clone(), empty.clone(), b.clone(), c.clone()]),
            "A AND (B OR C)"
        );
    }

    #[test]
    fn glob_translation_matches_spec_table() {
        assert_eq!(like_pattern("*"), "%");
        assert_eq!(like_pattern("?"), "_");
        assert_eq!(like_pattern("%"), "\\%");
        assert_eq!(like_pattern("_"), "\\_");
        assert_eq!(like_pattern("Foo-*-Bar_%"), "Foo-%-Bar\\_\\%");
    }

    #[test]
    fn is_on_annotation_emits_containment() {
        let query = QueryBuilder::new()
            .annotation_is("org.opencontainers.image.title", "demo")
            .build();
        let compiled = compile(&query, Target::Image).unwrap();
        assert_eq!(compiled.where_clause, "annotations @> $1");
        assert_eq!(compiled.args.len(), 1);
        assert!(matches!(compiled.args[0], CompiledArg::Json(_)));
    }

    #[test]
    fn exists_on_annotation_emits_key_existence() {
        let query = QueryBuilder::new()
            .annotation_exists("org.opencontainers.image.title")
            .build();
        let compiled = compile(&query, Target::Image).unwrap();
        assert_eq!(compiled.where_clause, "annotations ? $1");
    }

    #[test]
    fn exists_on_scalar_is_a_programmer_error() {
        let query = Query {
            repository: vec![Term::Exists],
            ..Default::default()
        };
        let err = compile(&query, Target::Image).unwrap_err();
        assert!(matches!(err, CatalogError::Programmer(_)));
    }

    #[test]
    fn argument_vector_length_matches_placeholder_count() {
        let query = QueryBuilder::new()
            .repository("a/x")
            .tag_matches("v*")
            .annotation_is("k", "v")
            .build();
        let compiled = compile(&query, Target::Image).unwrap();
        let placeholders = compiled.where_clause.matches('$').count();
        assert_eq!(placeholders, compiled.args.len());
    }

    #[test]
    fn list_target_excludes_os_filter() {
        let query = QueryBuilder::new().os("linux").build();
        let compiled = compile(&query, Target::List).unwrap();
        assert_eq!(compiled.where_clause, "FALSE");
    }
}
