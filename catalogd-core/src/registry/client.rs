//! `reqwest`-backed [`RegistryClient`] talking to a Docker Registry HTTP
//! API V2-compatible endpoint. §1 scopes the actual negotiation logic out
//! of the core's budget; this is the thin, idiomatic wiring that realizes
//! the trait contract (§10's "external collaborators" clause).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{CatalogError, Result};
use super::{
    classify, Descriptor, ImageManifest, Kind, ListManifest, Manifest, RegistryClient,
    RepositoryPage, MANIFEST_ACCEPT_HEADER,
};

const CATALOG_PAGE_SIZE: u32 = 100;

/// Talks to a single registry base URL (e.g. `https://registry.example.com`).
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    base_url: String,
    http: Client,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn manifest_digest_header(response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Vec<String>,
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn repositories(&self, last: Option<&str>) -> Result<RepositoryPage> {
        let mut url = format!(
            "{}?n={}",
            self.url("/v2/_catalog"),
            CATALOG_PAGE_SIZE
        );
        if let Some(last) = last {
            url.push_str(&format!("&last={}", urlencode(last)));
        }

        let response = self.http.get(&url).send().await?.error_for_status()?;
        let has_next = response.headers().contains_key(reqwest::header::LINK);
        let body: CatalogResponse = response.json().await?;
        let eof = !has_next && (body.repositories.len() as u32) < CATALOG_PAGE_SIZE;

        Ok(RepositoryPage {
            repositories: body.repositories,
            eof,
        })
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = self.url(&format!("/v2/{repository}/tags/list"));
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body: TagsResponse = response.error_for_status()?.json().await?;
        Ok(body.tags)
    }

    async fn tag_descriptor(&self, repository: &str, tag: &str) -> Result<Descriptor> {
        let url = self.url(&format!("/v2/{repository}/manifests/{tag}"));
        let response = self
            .http
            .head(&url)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT_HEADER)
            .send()
            .await?
            .error_for_status()?;

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let digest = Self::manifest_digest_header(&response).ok_or_else(|| {
            CatalogError::Registry(format!("{repository}:{tag}: missing Docker-Content-Digest"))
        })?;
        let size = response.content_length().map(|n| n as i64);

        Ok(Descriptor {
            media_type,
            digest,
            size,
        })
    }

    async fn manifest(&self, repository: &str, digest: &str) -> Result<Manifest> {
        let url = self.url(&format!("/v2/{repository}/manifests/{digest}"));
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT_HEADER)
            .send()
            .await?
            .error_for_status()?;

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await?;

        match classify(&media_type) {
            Some(Kind::Image) => {
                let manifest: ImageManifest = serde_json::from_slice(&bytes)
                    .map_err(|e| CatalogError::Registry(format!("{digest}: {e}")))?;
                Ok(Manifest::Image(manifest))
            }
            Some(Kind::List) => {
                let manifest: ListManifest = serde_json::from_slice(&bytes)
                    .map_err(|e| CatalogError::Registry(format!("{digest}: {e}")))?;
                Ok(Manifest::List(manifest))
            }
            None => Err(CatalogError::Registry(format!(
                "{digest}: unsupported media type {media_type}"
            ))),
        }
    }

    async fn blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("/v2/{repository}/blobs/{digest}"));
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
