//! Content-addressed image/list data model (§3 of the design).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form string-keyed metadata. `BTreeMap` keeps JSON output key-sorted,
/// which keeps test fixtures and HTTP responses byte-stable.
pub type MetadataMap = BTreeMap<String, String>;

/// A single content-addressed image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub digest: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default)]
    pub annotations: MetadataMap,
    #[serde(default)]
    pub labels: MetadataMap,
}

/// A multi-arch manifest list, carrying its fully resolved member images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageList {
    pub digest: String,
    pub media_type: String,
    #[serde(default)]
    pub annotations: MetadataMap,
    pub images: Vec<Image>,
}

/// An [`Image`] as surfaced by a query, carrying the sorted tags that
/// currently resolve to it within one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedImage {
    #[serde(flatten)]
    pub image: Image,
    pub tags: Vec<String>,
}

/// An [`ImageList`] as surfaced by a query, carrying its sorted tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedImageList {
    #[serde(flatten)]
    pub list: ImageList,
    pub tags: Vec<String>,
}

/// A query-result view: one repository with its tagged images and lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub images: Vec<TaggedImage>,
    #[serde(default)]
    pub lists: Vec<TaggedImageList>,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            images: Vec::new(),
            lists: Vec::new(),
        }
    }

    /// Sorts each tag array in place. Query execution must call this before
    /// handing results to an HTTP handler (§3 invariant: tag arrays are
    /// sorted).
    pub fn sort_tags(&mut self) {
        for image in &mut self.images {
            image.tags.sort();
        }
        for list in &mut self.lists {
            list.tags.sort();
        }
    }
}
