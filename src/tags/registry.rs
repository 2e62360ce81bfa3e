//! Registry client trait for listing and describing repository tags

use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::tags::error::RegistryError;
use crate::tags::types::{RawTag, RegistryKind, Repository, Tag};

/// Lazy sequence of raw tag records, produced page by page.
///
/// The stream is finite and cannot be resumed; listing again issues a fresh
/// request from the first page.
pub type TagStream = BoxStream<'static, Result<RawTag, RegistryError>>;

/// Trait for listing tags from a container registry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    /// Returns the kind of registry this implementation handles
    fn kind(&self) -> RegistryKind;

    /// Lists the tags of a repository
    ///
    /// Pages are fetched on demand while the stream is polled, so dropping the
    /// stream early stops further requests. Entries carry metadata when the
    /// registry embeds it in the listing.
    fn list_tags(&self, repository: &Repository) -> TagStream;

    /// Fetches creation time, digest and size for a single tag
    ///
    /// # Returns
    /// * `Ok(Tag)` - The tag with whatever metadata the registry exposes
    /// * `Err(RegistryError)` - If the fetch fails after retries
    async fn fetch_tag_metadata(
        &self,
        repository: &Repository,
        tag_name: &str,
    ) -> Result<Tag, RegistryError>;
}
