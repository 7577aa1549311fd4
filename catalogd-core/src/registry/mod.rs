//! Registry client interface (§6 "Outbound" interfaces) and the manifest
//! shapes the fetch pipeline parses.
//!
//! The trait is the contract the rest of the crate depends on; `client`
//! supplies the one real implementation, talking to a Docker Registry
//! HTTP API V2-compatible endpoint over `reqwest`. Tests elsewhere in the
//! crate substitute an in-memory fake against the same trait.

mod client;
#[cfg(any(test, feature = "testing"))]
pub mod fake;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::model::MetadataMap;

pub use client::HttpRegistryClient;
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeRegistryClient;

/// OCI image manifest media type.
pub const MEDIA_TYPE_OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index (multi-arch list) media type.
pub const MEDIA_TYPE_OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker Registry v2 single-image manifest media type.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker Registry v2 manifest list (multi-arch) media type.
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Accept header value advertising every manifest media type this pipeline
/// understands, so the registry returns digest-accurate content regardless
/// of whether the underlying image is OCI or Docker schema2.
pub const MANIFEST_ACCEPT_HEADER: &str = "application/vnd.oci.image.manifest.v1+json, application/vnd.oci.image.index.v1+json, application/vnd.docker.distribution.manifest.v2+json, application/vnd.docker.distribution.manifest.list.v2+json";

/// What kind of content a media type classifies as. Unknown media types
/// classify as neither, and the fetch pipeline skips them (§4.3 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Image,
    List,
}

/// Classifies a manifest media type, per §4.3 step 1 and the `list`/`image`
/// schema split in §3.
pub fn classify(media_type: &str) -> Option<Kind> {
    match media_type {
        MEDIA_TYPE_OCI_IMAGE_MANIFEST | MEDIA_TYPE_DOCKER_MANIFEST => Some(Kind::Image),
        MEDIA_TYPE_OCI_IMAGE_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST => Some(Kind::List),
        _ => None,
    }
}

/// A content-addressed reference as returned by a tag `stat` or embedded in
/// a manifest list's `manifests` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: Option<i64>,
}

/// A parsed single-image manifest: layers plus the descriptor of its
/// config blob, and any OCI `annotations` (absent on Docker schema2 — §3's
/// annotations/labels invariant).
#[derive(Debug, Clone, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub annotations: MetadataMap,
}

/// A parsed manifest list: one descriptor per platform variant.
#[derive(Debug, Clone, Deserialize)]
pub struct ListManifest {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
    #[serde(default)]
    pub annotations: MetadataMap,
}

/// Either manifest schema, tagged by the media type observed at fetch time.
#[derive(Debug, Clone)]
pub enum Manifest {
    Image(ImageManifest),
    List(ListManifest),
}

/// The shape the fetch pipeline expects from an image's config blob (§6
/// "Config blob JSON shape").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigBlob {
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub config: ConfigBlobInner,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigBlobInner {
    #[serde(rename = "Labels", default)]
    pub labels: MetadataMap,
}

/// One page of the repository catalog listing.
#[derive(Debug, Clone)]
pub struct RepositoryPage {
    pub repositories: Vec<String>,
    pub eof: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_media_types() {
        assert_eq!(classify(MEDIA_TYPE_OCI_IMAGE_MANIFEST), Some(Kind::Image));
        assert_eq!(classify(MEDIA_TYPE_DOCKER_MANIFEST), Some(Kind::Image));
        assert_eq!(classify(MEDIA_TYPE_OCI_IMAGE_INDEX), Some(Kind::List));
        assert_eq!(classify(MEDIA_TYPE_DOCKER_MANIFEST_LIST), Some(Kind::List));
    }

    #[test]
    fn unrecognized_media_type_classifies_as_none() {
        assert_eq!(classify("application/octet-stream"), None);
    }
}

/// The interface the fetch pipeline uses to read registry state. §1
/// deliberately scopes the real HTTP negotiation out of this crate's core
/// — this trait is the contract; [`HttpRegistryClient`] is the one
/// production implementation.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Lists one page of repository names, starting after `last` (`None`
    /// for the first page). Mirrors `repositories(page, last) -> (page,
    /// eof)` from §6.
    async fn repositories(&self, last: Option<&str>) -> Result<RepositoryPage>;

    /// Lists every tag in a repository.
    async fn tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Stats a tag, returning its manifest descriptor without fetching the
    /// manifest body.
    async fn tag_descriptor(&self, repository: &str, tag: &str) -> Result<Descriptor>;

    /// Fetches and parses a manifest by digest.
    async fn manifest(&self, repository: &str, digest: &str) -> Result<Manifest>;

    /// Fetches a blob's raw bytes by digest.
    async fn blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>>;
}
