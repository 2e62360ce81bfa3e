//! OCI distribution API implementation (Microsoft Container Registry, Chainguard)
//!
//! The tag listing only returns names. Metadata needs up to three calls per
//! tag: the manifest (or image index), the platform manifest, and the config
//! blob that carries the creation time.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use futures::{StreamExt, TryStreamExt, stream};
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::tags::error::RegistryError;
use crate::tags::http::HttpTransport;
use crate::tags::registries::{absolute_url, parse_timestamp, repository_not_found};
use crate::tags::registry::{RegistryClient, TagStream};
use crate::tags::types::{RawTag, RegistryKind, Repository, Tag, TagMetadata};

/// Default base URL for the Microsoft Container Registry
pub const MCR_BASE_URL: &str = "https://mcr.microsoft.com";

/// Default base URL for the Chainguard registry
pub const CHAINGUARD_BASE_URL: &str = "https://cgr.dev";

const CHAINGUARD_NAMESPACE: &str = "chainguard";

const PAGE_SIZE: usize = 100;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.v2+json";

const DIGEST_HEADER: &str = "docker-content-digest";

static CHALLENGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid regex"));

static NEXT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("valid regex"));

/// Response from `GET /v2/{name}/tags/list`
#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Image manifest or image index; only the fields needed for metadata
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<PlatformDescriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct PlatformDescriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    os: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl Manifest {
    /// Picks the linux/amd64 entry of an image index, or the first entry
    fn preferred_platform(&self) -> Option<&PlatformDescriptor> {
        self.manifests
            .iter()
            .find(|m| {
                m.platform
                    .as_ref()
                    .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
            })
            .or_else(|| self.manifests.first())
    }

    fn total_layer_size(&self) -> Option<u64> {
        if self.layers.is_empty() {
            None
        } else {
            Some(self.layers.iter().map(|l| l.size).sum())
        }
    }
}

/// Parses the parameters of a `WWW-Authenticate: Bearer ...` challenge
fn parse_bearer_challenge(challenge: &str) -> Option<HashMap<String, String>> {
    let params = challenge.trim().strip_prefix("Bearer")?;
    let params: HashMap<String, String> = CHALLENGE_PARAM
        .captures_iter(params)
        .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
        .collect();
    params.contains_key("realm").then_some(params)
}

/// Extracts the `rel="next"` target of a `Link` header
fn parse_next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    NEXT_LINK.captures(link).map(|c| c[1].to_string())
}

struct OciInner {
    kind: RegistryKind,
    http: HttpTransport,
    base_url: String,
    default_namespace: Option<String>,
    /// Bearer tokens per repository path
    tokens: Mutex<HashMap<String, String>>,
}

impl OciInner {
    fn repository_path(&self, repository: &Repository) -> String {
        match (&repository.namespace, &self.default_namespace) {
            (Some(ns), _) => format!("{}/{}", ns, repository.name),
            (None, Some(ns)) if !repository.name.contains('/') => {
                format!("{}/{}", ns, repository.name)
            }
            _ => repository.name.clone(),
        }
    }

    fn headers(&self, repo_path: &str, accept: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(accept) = accept {
            headers.insert(ACCEPT, HeaderValue::from_static(accept));
        }

        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = tokens
            .get(repo_path)
            .and_then(|token| HeaderValue::from_str(&format!("Bearer {}", token)).ok())
        {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    /// GET with anonymous bearer-token authentication.
    ///
    /// On a 401 carrying a bearer challenge, a token is requested from the
    /// challenge realm and the request is repeated once with it.
    async fn get_json<T: DeserializeOwned>(
        &self,
        repo_path: &str,
        url: &str,
        accept: Option<&'static str>,
    ) -> Result<(T, HeaderMap), RegistryError> {
        let result = self
            .http
            .get_json(url, &self.headers(repo_path, accept))
            .await;

        let challenge = match &result {
            Err(RegistryError::AuthRequired {
                challenge: Some(challenge),
                ..
            }) => parse_bearer_challenge(challenge),
            _ => None,
        };
        let Some(challenge) = challenge else {
            return result;
        };

        let token = self.fetch_token(&challenge).await?;
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo_path.to_string(), token);

        self.http
            .get_json(url, &self.headers(repo_path, accept))
            .await
    }

    async fn fetch_token(
        &self,
        challenge: &HashMap<String, String>,
    ) -> Result<String, RegistryError> {
        let realm = &challenge["realm"];
        let params: Vec<(&str, &str)> = ["service", "scope"]
            .into_iter()
            .filter_map(|key| challenge.get(key).map(|v| (key, v.as_str())))
            .collect();
        let url = reqwest::Url::parse_with_params(realm, &params)
            .map_err(|e| RegistryError::InvalidResponse(format!("Invalid token realm: {}", e)))?;

        info!("Requesting registry token from {}", realm);
        let (response, _): (TokenResponse, _) =
            self.http.get_json(url.as_str(), &HeaderMap::new()).await?;

        response
            .token
            .or(response.access_token)
            .ok_or_else(|| RegistryError::InvalidResponse("Token response without token".into()))
    }
}

/// Registry implementation for the OCI distribution API
#[derive(Clone)]
pub struct OciClient {
    inner: Arc<OciInner>,
}

impl OciClient {
    fn build(
        kind: RegistryKind,
        base_url: &str,
        http: HttpTransport,
        default_namespace: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(OciInner {
                kind,
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                default_namespace,
                tokens: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a new OciClient reporting itself as `kind`
    pub fn new(kind: RegistryKind, base_url: &str, http: HttpTransport) -> Self {
        Self::build(kind, base_url, http, None)
    }

    /// Client for the Microsoft Container Registry
    pub fn mcr(base_url: &str, http: HttpTransport) -> Self {
        Self::new(RegistryKind::Mcr, base_url, http)
    }

    /// Client for the Chainguard registry, where bare names live under `chainguard/`
    pub fn chainguard(base_url: &str, http: HttpTransport) -> Self {
        Self::build(
            RegistryKind::Chainguard,
            base_url,
            http,
            Some(CHAINGUARD_NAMESPACE.to_string()),
        )
    }
}

#[async_trait::async_trait]
impl RegistryClient for OciClient {
    fn kind(&self) -> RegistryKind {
        self.inner.kind
    }

    fn list_tags(&self, repository: &Repository) -> TagStream {
        let inner = self.inner.clone();
        let repo_path = inner.repository_path(repository);
        let first_page = format!(
            "{}/v2/{}/tags/list?n={}",
            inner.base_url, repo_path, PAGE_SIZE
        );

        stream::try_unfold(Some(first_page), move |next| {
            let inner = inner.clone();
            let repo_path = repo_path.clone();
            async move {
                let Some(url) = next else {
                    return Ok(None);
                };

                let (list, headers): (TagList, _) = inner.get_json(&repo_path, &url, None).await?;
                let names = list.tags.unwrap_or_default();
                debug!("Fetched {} tags from {}", names.len(), url);

                let next = if names.is_empty() {
                    None
                } else {
                    parse_next_link(&headers).map(|link| absolute_url(&inner.base_url, &link))
                };
                let tags: Vec<RawTag> = names.into_iter().map(RawTag::bare).collect();
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
        let inner = &self.inner;
        let repo_path = inner.repository_path(repository);
        let manifest_url = format!("{}/v2/{}/manifests/{}", inner.base_url, repo_path, tag_name);

        let (mut manifest, headers): (Manifest, _) = inner
            .get_json(&repo_path, &manifest_url, Some(MANIFEST_ACCEPT))
            .await?;
        let digest = headers
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let platform_digest = manifest.preferred_platform().map(|p| p.digest.clone());
        if let Some(platform_digest) = platform_digest {
            let url = format!(
                "{}/v2/{}/manifests/{}",
                inner.base_url, repo_path, platform_digest
            );
            (manifest, _) = inner
                .get_json(&repo_path, &url, Some(MANIFEST_ACCEPT))
                .await?;
        }

        let created_at = match &manifest.config {
            Some(config) => {
                let url = format!("{}/v2/{}/blobs/{}", inner.base_url, repo_path, config.digest);
                let (config, _): (ImageConfig, _) = inner.get_json(&repo_path, &url, None).await?;
                config.created.as_deref().and_then(parse_timestamp)
            }
            None => None,
        };

        Ok(Tag::new(
            tag_name,
            TagMetadata {
                created_at,
                digest,
                size_bytes: manifest.total_layer_size(),
            },
        ))
    }
}
