//! In-memory [`RegistryClient`] fixture for tests. Gated behind
//! `cfg(test)` or the `testing` feature (see `Cargo.toml`) so both this
//! crate's own tests and `catalogd-server`'s integration tests can seed a
//! fake registry without standing up a real one.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::{
    Descriptor, ImageManifest, ListManifest, Manifest, RegistryClient, RepositoryPage,
    MEDIA_TYPE_OCI_IMAGE_INDEX, MEDIA_TYPE_OCI_IMAGE_MANIFEST,
};
use crate::error::{CatalogError, Result};
use crate::model::MetadataMap;

#[derive(Debug, Clone, Default)]
struct FakeRepo {
    tags: HashMap<String, Descriptor>,
}

#[derive(Default)]
struct FakeState {
    repos: HashMap<String, FakeRepo>,
    manifests: HashMap<String, Manifest>,
    blobs: HashMap<String, Vec<u8>>,
}

/// A hand-populated registry double: test setup code calls
/// [`Self::tag_image`]/[`Self::tag_list`]/[`Self::put_blob`] directly
/// instead of the fixture parsing anything off the wire.
#[derive(Default)]
pub struct FakeRegistryClient {
    state: Mutex<FakeState>,
}

impl FakeRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `repository` even if no tag is added yet, so it shows up
    /// in [`RegistryClient::repositories`] (used by `FetchAll` tests).
    pub fn add_repository(&self, repository: &str) {
        self.state
            .lock()
            .unwrap()
            .repos
            .entry(repository.to_string())
            .or_default();
    }

    fn tag(&self, repository: &str, tag: &str, digest: &str, media_type: &str) {
        self.add_repository(repository);
        let mut state = self.state.lock().unwrap();
        state.repos.get_mut(repository).unwrap().tags.insert(
            tag.to_string(),
            Descriptor {
                media_type: media_type.to_string(),
                digest: digest.to_string(),
                size: None,
            },
        );
    }

    /// Removes a tag, as if it had been deleted or repointed away in the
    /// real registry (the next `fetch_repository` will observe it gone).
    pub fn untag(&self, repository: &str, tag: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(repo) = state.repos.get_mut(repository) {
            repo.tags.remove(tag);
        }
    }

    /// Tags `digest` as a plain OCI image manifest within `repository`.
    /// The manifest and its config blob must already be present via
    /// [`Self::put_image`].
    pub fn tag_image(&self, repository: &str, tag: &str, digest: &str) {
        self.tag(repository, tag, digest, MEDIA_TYPE_OCI_IMAGE_MANIFEST);
    }

    /// Tags `digest` as an OCI image index within `repository`.
    pub fn tag_list(&self, repository: &str, tag: &str, digest: &str) {
        self.tag(repository, tag, digest, MEDIA_TYPE_OCI_IMAGE_INDEX);
    }

    /// Stores an image manifest plus a synthesized config blob, keyed by
    /// `digest`, with the `os`/`architecture`/labels the fetch pipeline
    /// will read back out of the config blob.
    pub fn put_image(
        &self,
        digest: &str,
        config_digest: &str,
        os: &str,
        architecture: &str,
        annotations: MetadataMap,
        labels: MetadataMap,
    ) {
        let manifest = ImageManifest {
            media_type: MEDIA_TYPE_OCI_IMAGE_MANIFEST.to_string(),
            config: Descriptor {
                media_type: "application/vnd.oci.image.config.v1+json".to_string(),
                digest: config_digest.to_string(),
                size: None,
            },
            layers: Vec::new(),
            annotations,
        };
        let config = json!({
            "os": os,
            "architecture": architecture,
            "config": { "Labels": labels },
        });

        let mut state = self.state.lock().unwrap();
        state
            .manifests
            .insert(digest.to_string(), Manifest::Image(manifest));
        state.blobs.insert(
            config_digest.to_string(),
            serde_json::to_vec(&config).unwrap(),
        );
    }

    /// Stores a manifest list referencing `member_digests` (which must
    /// already be stored via [`Self::put_image`]).
    pub fn put_list(&self, digest: &str, annotations: MetadataMap, member_digests: &[&str]) {
        let manifests = member_digests
            .iter()
            .map(|member_digest| Descriptor {
                media_type: MEDIA_TYPE_OCI_IMAGE_MANIFEST.to_string(),
                digest: member_digest.to_string(),
                size: None,
            })
            .collect();
        let manifest = ListManifest {
            media_type: MEDIA_TYPE_OCI_IMAGE_INDEX.to_string(),
            manifests,
            annotations,
        };
        self.state
            .lock()
            .unwrap()
            .manifests
            .insert(digest.to_string(), Manifest::List(manifest));
    }

    pub fn put_blob(&self, digest: &str, bytes: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(digest.to_string(), bytes);
    }
}

#[async_trait]
impl RegistryClient for FakeRegistryClient {
    async fn repositories(&self, last: Option<&str>) -> Result<RepositoryPage> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.repos.keys().cloned().collect();
        names.sort();
        if let Some(last) = last {
            names.retain(|name| name.as_str() > last);
        }
        Ok(RepositoryPage {
            repositories: names,
            eof: true,
        })
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .repos
            .get(repository)
            .map(|repo| repo.tags.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn tag_descriptor(&self, repository: &str, tag: &str) -> Result<Descriptor> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(repository)
            .and_then(|repo| repo.tags.get(tag))
            .cloned()
            .ok_or_else(|| CatalogError::Registry(format!("{repository}:{tag}: no such tag")))
    }

    async fn manifest(&self, _repository: &str, digest: &str) -> Result<Manifest> {
        let state = self.state.lock().unwrap();
        state
            .manifests
            .get(digest)
            .cloned()
            .ok_or_else(|| CatalogError::Registry(format!("{digest}: no such manifest")))
    }

    async fn blob(&self, _repository: &str, digest: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| CatalogError::Registry(format!("{digest}: no such blob")))
    }
}
