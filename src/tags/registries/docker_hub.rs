//! Docker Hub API implementation

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::debug;

use crate::tags::error::RegistryError;
use crate::tags::http::HttpTransport;
use crate::tags::registries::{absolute_url, parse_timestamp, repository_not_found};
use crate::tags::registry::{RegistryClient, TagStream};
use crate::tags::types::{RawTag, RegistryKind, Repository, Tag, TagMetadata};

/// Default base URL for Docker Hub
pub const DEFAULT_BASE_URL: &str = "https://hub.docker.com";

/// Namespace of official images
const OFFICIAL_NAMESPACE: &str = "library";

const PAGE_SIZE: usize = 100;

/// One page of `GET /v2/repositories/{namespace}/{name}/tags`
#[derive(Debug, Deserialize)]
struct TagsPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<HubTag>,
}

#[derive(Debug, Deserialize)]
struct HubTag {
    name: String,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    tag_last_pushed: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    full_size: Option<u64>,
    #[serde(default)]
    images: Vec<HubImage>,
}

#[derive(Debug, Deserialize)]
struct HubImage {
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

impl HubTag {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated
            .as_deref()
            .or(self.tag_last_pushed.as_deref())
            .and_then(parse_timestamp)
    }

    fn metadata(&self) -> TagMetadata {
        let digest = self
            .digest
            .clone()
            .or_else(|| self.images.iter().find_map(|image| image.digest.clone()));

        let images_size: u64 = self.images.iter().filter_map(|image| image.size).sum();
        let size_bytes = self
            .full_size
            .or((images_size > 0).then_some(images_size));

        TagMetadata {
            created_at: self.created_at(),
            digest,
            size_bytes,
        }
    }

    fn into_raw(self) -> RawTag {
        let metadata = self.metadata();
        RawTag::with_metadata(self.name, metadata)
    }
}

/// Registry implementation for the Docker Hub API
///
/// The tag listing embeds creation time, digest and size, so no per-tag
/// detail call is needed during resolution.
#[derive(Debug, Clone)]
pub struct DockerHubClient {
    http: HttpTransport,
    base_url: String,
}

impl DockerHubClient {
    /// Creates a new DockerHubClient with a custom base URL
    pub fn new(base_url: &str, http: HttpTransport) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `namespace/name`, defaulting to the official `library` namespace
    fn repository_path(repository: &Repository) -> String {
        match &repository.namespace {
            Some(ns) => format!("{}/{}", ns, repository.name),
            None if repository.name.contains('/') => repository.name.clone(),
            None => format!("{}/{}", OFFICIAL_NAMESPACE, repository.name),
        }
    }
}

#[async_trait::async_trait]
impl RegistryClient for DockerHubClient {
    fn kind(&self) -> RegistryKind {
        RegistryKind::DockerHub
    }

    fn list_tags(&self, repository: &Repository) -> TagStream {
        let first_page = format!(
            "{}/v2/repositories/{}/tags?page_size={}",
            self.base_url,
            Self::repository_path(repository),
            PAGE_SIZE
        );
        let http = self.http.clone();
        let base_url = self.base_url.clone();

        stream::try_unfold(Some(first_page), move |next| {
            let http = http.clone();
            let base_url = base_url.clone();
            async move {
                let Some(url) = next else {
                    return Ok(None);
                };

                let (page, _): (TagsPage, _) = http.get_json(&url, &HeaderMap::new()).await?;
                debug!("Fetched {} tags from {}", page.results.len(), url);

                if page.results.is_empty() {
                    return Ok(Some((Vec::new(), None)));
                }

                let next = page
                    .next
                    .filter(|n| !n.is_empty())
                    .map(|n| absolute_url(&base_url, &n));
                let tags: Vec<RawTag> = page.results.into_iter().map(HubTag::into_raw).collect();
                Ok(Some((tags, next)))
            }
        })
        .map_err(repository_not_found(repository))
        .map_ok(|tags| stream::iter(tags.into_iter().map(Ok::<RawTag, RegistryError>)))
        .try_flatten()
        .boxed()
    }

    async fn fetch_tag_metadata(
        &self,
        repository: &Repository,
        tag_name: &str,
    ) -> Result<Tag, RegistryError> {
        let url = format!(
            "{}/v2/repositories/{}/tags/{}",
            self.base_url,
            Self::repository_path(repository),
            tag_name
        );

        let (tag, _): (HubTag, _) = self.http.get_json(&url, &HeaderMap::new()).await?;
        let metadata = tag.metadata();
        Ok(Tag::new(tag.name, metadata))
    }
}
