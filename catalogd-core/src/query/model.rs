//! Query model: a record of predicate groups, built with a fluent builder
//! (§4.4), grounded in the teacher's `QueryBuilder` pattern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One predicate within a group. `Exists` only makes sense against a
/// map-valued group (annotations/labels); the compiler rejects it on a
/// scalar group as a programmer error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    Is(String),
    Matches(String),
    Exists,
}

/// A conjunction-of-disjunctions query: every non-empty group must have at
/// least one of its terms satisfied (OR within a group, AND across groups).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub repository: Vec<Term>,
    #[serde(default)]
    pub tag: Vec<Term>,
    #[serde(default)]
    pub os: Vec<Term>,
    #[serde(default)]
    pub architecture: Vec<Term>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Vec<Term>>,
    #[serde(default)]
    pub labels: BTreeMap<String, Vec<Term>>,
}

impl Query {
    pub fn is_empty(&self) -> bool {
        self.repository.is_empty()
            && self.tag.is_empty()
            && self.os.is_empty()
            && self.architecture.is_empty()
            && self.annotations.values().all(|v| v.is_empty())
            && self.labels.values().all(|v| v.is_empty())
    }
}

/// Fluent builder over [`Query`]. Every method consumes and returns `self`
/// so calls chain; `build()` yields the finished, immutable `Query`.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository(mut self, value: impl Into<String>) -> Self {
        self.query.repository.push(Term::Is(value.into()));
        self
    }

    pub fn repository_matches(mut self, glob: impl Into<String>) -> Self {
        self.query.repository.push(Term::Matches(glob.into()));
        self
    }

    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.query.tag.push(Term::Is(value.into()));
        self
    }

    pub fn tag_matches(mut self, glob: impl Into<String>) -> Self {
        self.query.tag.push(Term::Matches(glob.into()));
        self
    }

    pub fn os(mut self, value: impl Into<String>) -> Self {
        self.query.os.push(Term::Is(value.into()));
        self
    }

    pub fn architecture(mut self, value: impl Into<String>) -> Self {
        self.query.architecture.push(Term::Is(value.into()));
        self
    }

    pub fn annotation_is(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .annotations
            .entry(key.into())
            .or_default()
            .push(Term::Is(value.into()));
        self
    }

    pub fn annotation_matches(mut self, key: impl Into<String>, glob: impl Into<String>) -> Self {
        self.query
            .annotations
            .entry(key.into())
            .or_default()
            .push(Term::Matches(glob.into()));
        self
    }

    pub fn annotation_exists(mut self, key: impl Into<String>) -> Self {
        self.query
            .annotations
            .entry(key.into())
            .or_default()
            .push(Term::Exists);
        self
    }

    pub fn label_is(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .labels
            .entry(key.into())
            .or_default()
            .push(Term::Is(value.into()));
        self
    }

    pub fn label_matches(mut self, key: impl Into<String>, glob: impl Into<String>) -> Self {
        self.query
            .labels
            .entry(key.into())
            .or_default()
            .push(Term::Matches(glob.into()));
        self
    }

    pub fn label_exists(mut self, key: impl Into<String>) -> Self {
        self.query
            .labels
            .entry(key.into())
            .or_default()
            .push(Term::Exists);
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

impl Query {
    /// Convenience constructor mirroring a single `repository()` filter.
    pub fn for_repository(name: impl Into<String>) -> Self {
        QueryBuilder::new().repository(name).build()
    }
}
