//! Registry test utilities

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::{StreamExt, stream};

use tag_history::tags::error::RegistryError;
use tag_history::tags::registries::RegistryClients;
use tag_history::tags::registry::{RegistryClient, TagStream};
use tag_history::tags::resolver::HistoricalResolver;
use tag_history::tags::types::{RawTag, RegistryKind, Repository, Tag, TagMetadata};

/// Midnight UTC of the given day
pub fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// In-memory registry for testing
///
/// Tags are keyed by repository path. With `embedded` set the listing carries
/// metadata like Docker Hub; otherwise every tag needs a detail call like an
/// OCI registry.
pub struct MockRegistry {
    kind: RegistryKind,
    embedded: bool,
    tags: HashMap<String, Vec<(String, Option<DateTime<Utc>>)>>,
    failures: HashMap<String, RegistryError>,
    detail_calls: Arc<AtomicUsize>,
}

impl MockRegistry {
    pub fn new(kind: RegistryKind) -> Self {
        Self {
            kind,
            embedded: kind == RegistryKind::DockerHub,
            tags: HashMap::new(),
            failures: HashMap::new(),
            detail_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_tags(mut self, path: &str, tags: &[(&str, Option<DateTime<Utc>>)]) -> Self {
        self.tags.insert(
            path.to_string(),
            tags.iter()
                .map(|(name, created_at)| (name.to_string(), *created_at))
                .collect(),
        );
        self
    }

    pub fn with_failure(mut self, path: &str, error: RegistryError) -> Self {
        self.failures.insert(path.to_string(), error);
        self
    }

    /// Counter of `fetch_tag_metadata` calls, shared with the registry
    pub fn detail_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.detail_calls)
    }

    fn metadata(created_at: Option<DateTime<Utc>>) -> TagMetadata {
        TagMetadata {
            created_at,
            ..TagMetadata::default()
        }
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    fn kind(&self) -> RegistryKind {
        self.kind
    }

    fn list_tags(&self, repository: &Repository) -> TagStream {
        let path = repository.path();
        if let Some(error) = self.failures.get(&path) {
            return stream::iter(vec![Err(error.clone())]).boxed();
        }

        let Some(tags) = self.tags.get(&path) else {
            return stream::iter(vec![Err(RegistryError::NotFound(repository.to_string()))]).boxed();
        };

        let embedded = self.embedded;
        let raw: Vec<Result<RawTag, RegistryError>> = tags
            .iter()
            .map(|(name, created_at)| {
                Ok(if embedded {
                    RawTag::with_metadata(name.clone(), Self::metadata(*created_at))
                } else {
                    RawTag::bare(name.clone())
                })
            })
            .collect();
        stream::iter(raw).boxed()
    }

    async fn fetch_tag_metadata(
        &self,
        repository: &Repository,
        tag_name: &str,
    ) -> Result<Tag, RegistryError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.tags
            .get(&repository.path())
            .and_then(|tags| tags.iter().find(|(name, _)| name == tag_name))
            .map(|(name, created_at)| Tag::new(name.clone(), Self::metadata(*created_at)))
            .ok_or_else(|| RegistryError::NotFound(format!("{}:{}", repository, tag_name)))
    }
}

/// Create a resolver over the given registries with a fixed clock
pub fn create_test_resolver(registries: Vec<MockRegistry>, now: DateTime<Utc>) -> HistoricalResolver {
    let clients: RegistryClients = registries
        .into_iter()
        .map(|registry| {
            let client: Arc<dyn RegistryClient> = Arc::new(registry);
            (client.kind(), client)
        })
        .collect();
    HistoricalResolver::new(clients).with_clock(move || now)
}
