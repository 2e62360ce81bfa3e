//! Registry implementations for listing container image tags

pub mod docker_hub;
pub mod oci;

pub use docker_hub::DockerHubClient;
pub use oci::OciClient;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ResolverConfig;
use crate::tags::error::RegistryError;
use crate::tags::http::HttpTransport;
use crate::tags::rate_limit::RateLimiter;
use crate::tags::registry::RegistryClient;
use crate::tags::types::{RegistryKind, Repository};

/// Registry clients keyed by the registry they serve
pub type RegistryClients = HashMap<RegistryKind, Arc<dyn RegistryClient>>;

/// Create one client per supported registry, each with its own rate limiter
pub fn create_default_clients(config: &ResolverConfig) -> RegistryClients {
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let retry = config.retry.policy();
    let transport = |kind: RegistryKind| {
        let interval = Duration::from_millis(config.registries.min_interval_ms(kind));
        HttpTransport::new(timeout, Arc::new(RateLimiter::new(interval)), retry)
    };

    let mut clients: RegistryClients = HashMap::new();

    clients.insert(
        RegistryKind::DockerHub,
        Arc::new(DockerHubClient::new(
            &config.registries.base_url(RegistryKind::DockerHub),
            transport(RegistryKind::DockerHub),
        )),
    );

    clients.insert(
        RegistryKind::Mcr,
        Arc::new(OciClient::mcr(
            &config.registries.base_url(RegistryKind::Mcr),
            transport(RegistryKind::Mcr),
        )),
    );

    clients.insert(
        RegistryKind::Chainguard,
        Arc::new(OciClient::chainguard(
            &config.registries.base_url(RegistryKind::Chainguard),
            transport(RegistryKind::Chainguard),
        )),
    );

    clients
}

/// Parses an RFC 3339 timestamp and normalizes it to UTC
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Resolves a pagination link that may be relative to the registry base URL
pub(crate) fn absolute_url(base_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else if link.starts_with('/') {
        format!("{}{}", base_url, link)
    } else {
        format!("{}/{}", base_url, link)
    }
}

/// Reports a 404 from a listing against the repository instead of the page URL
pub(crate) fn repository_not_found(
    repository: &Repository,
) -> impl Fn(RegistryError) -> RegistryError + Send + Sync + use<> {
    let name = repository.to_string();
    move |e| match e {
        RegistryError::NotFound(_) => RegistryError::NotFound(name.clone()),
        e => e,
    }
}
