//! In-memory cache of enriched tag metadata

use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::tags::error::RegistryError;
use crate::tags::types::{Tag, TagKey};

/// Read-mostly cache of tag metadata shared by all workers.
///
/// Tags are immutable, so entries never expire. Two workers missing the same
/// key concurrently both fetch it and the later insert wins; both values
/// describe the same tag.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<TagKey, Tag>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TagKey) -> Option<Tag> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: TagKey, tag: Tag) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, tag);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached tag or runs `fetch` and caches its result.
    /// Failures are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: TagKey, fetch: F) -> Result<Tag, RegistryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Tag, RegistryError>>,
    {
        if let Some(tag) = self.get(&key) {
            debug!("Cache hit for {}:{}", key.repository, key.tag);
            return Ok(tag);
        }

        let tag = fetch().await?;
        self.insert(key, tag.clone());
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::types::{RegistryKind, Repository, TagMetadata};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key(tag: &str) -> TagKey {
        TagKey::new(&Repository::new(RegistryKind::Mcr, "dotnet/runtime"), tag)
    }

    #[tokio::test]
    async fn get_or_fetch_fetches_once_per_key() {
        let cache = MetadataCache::new();
        let calls = &AtomicU32::new(0);

        for _ in 0..3 {
            let tag = cache
                .get_or_fetch(key("8.0"), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Tag::new("8.0", TagMetadata::default()))
                })
                .await
                .unwrap();
            assert_eq!(tag.name, "8.0");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn get_or_fetch_does_not_cache_failures() {
        let cache = MetadataCache::new();

        let result = cache
            .get_or_fetch(key("8.0"), || async {
                Err(RegistryError::Server { status: 503 })
            })
            .await;

        assert_eq!(result, Err(RegistryError::Server { status: 503 }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_population_keeps_cache_consistent() {
        let cache = Arc::new(MetadataCache::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(key("9.0"), || async {
                            tokio::task::yield_now().await;
                            Ok(Tag::new("9.0", TagMetadata::default()))
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().name, "9.0");
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("9.0")).map(|t| t.name), Some("9.0".to_string()));
    }
}
