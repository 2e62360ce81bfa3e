//! Historical tag resolution
//!
//! For each requested offset the resolver computes `now - offset_days` and
//! selects the latest-created candidate that existed at that point. Offset 0
//! always takes the first candidate.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt, TryStreamExt, future};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::tags::cache::MetadataCache;
use crate::tags::error::{RegistryError, ResolveError};
use crate::tags::filter::{FilterPolicy, TagFilter, order_candidates};
use crate::tags::registries::RegistryClients;
use crate::tags::registry::RegistryClient;
use crate::tags::types::{Repository, Tag, TagKey, TimeOffset};

/// What to do for historical offsets when no candidate carries a creation time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTimestampPolicy {
    /// Historical offsets resolve to absent
    #[default]
    Absent,
    /// Historical offsets report the current tag, marked as substituted
    UseCurrent,
}

/// Outcome for a single offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "tag", rename_all = "snake_case")]
pub enum Resolution {
    /// A tag created on or before the target date
    Found(Tag),
    /// The current tag, standing in because the registry reports no timestamps
    Substituted(Tag),
    /// No tag qualifies
    Absent,
}

impl Resolution {
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Resolution::Found(tag) | Resolution::Substituted(tag) => Some(tag),
            Resolution::Absent => None,
        }
    }
}

/// Resolutions keyed by offset label, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionResult {
    pub offsets: IndexMap<String, Resolution>,
}

impl ResolutionResult {
    pub fn get(&self, label: &str) -> Option<&Resolution> {
        self.offsets.get(label)
    }

    /// Name of the tag resolved for `label`, if any
    pub fn tag_name(&self, label: &str) -> Option<&str> {
        self.get(label)
            .and_then(Resolution::tag)
            .map(|tag| tag.name.as_str())
    }
}

/// A single repository to resolve
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    pub repository: Repository,
    pub offsets: Vec<TimeOffset>,
    pub filter: FilterPolicy,
    /// Stop listing after this many tags
    pub max_tags: Option<usize>,
}

impl ResolveRequest {
    pub fn new(repository: Repository, offsets: Vec<TimeOffset>) -> Self {
        Self {
            repository,
            offsets,
            filter: FilterPolicy::default(),
            max_tags: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterPolicy) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_tags(mut self, max_tags: Option<usize>) -> Self {
        self.max_tags = max_tags;
        self
    }
}

/// The instant `offset_days` whole days before `now`, or `None` when that
/// lies before the earliest representable date
pub fn target_date(now: DateTime<Utc>, offset_days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(offset_days)).and_then(|days| now.checked_sub_signed(days))
}

/// Selects the tag for one offset from an ordered candidate sequence.
///
/// Offset 0 returns the first candidate. Otherwise the latest-created
/// candidate with `created_at <= now - offset_days` wins (none when the
/// target date is out of range); on equal
/// timestamps the one earlier in the sequence (higher version) is kept.
/// Candidates without a creation time never qualify.
pub fn select_for_offset<'a>(
    candidates: &'a [Tag],
    offset: &TimeOffset,
    now: DateTime<Utc>,
) -> Option<&'a Tag> {
    if offset.is_current() {
        return candidates.first();
    }

    let target = target_date(now, offset.offset_days)?;
    candidates
        .iter()
        .filter(|tag| tag.created_at.is_some_and(|created| created <= target))
        .reduce(|best, tag| {
            if tag.created_at > best.created_at {
                tag
            } else {
                best
            }
        })
}

/// Resolves every offset against the same candidate sequence
pub fn resolve_offsets(
    candidates: &[Tag],
    offsets: &[TimeOffset],
    now: DateTime<Utc>,
    missing_timestamps: MissingTimestampPolicy,
) -> ResolutionResult {
    let undated = !candidates.iter().any(|tag| tag.created_at.is_some());
    let mut result = ResolutionResult::default();

    for offset in offsets {
        let resolution = match select_for_offset(candidates, offset, now) {
            Some(tag) => Resolution::Found(tag.clone()),
            None if undated && missing_timestamps == MissingTimestampPolicy::UseCurrent => {
                candidates
                    .first()
                    .map_or(Resolution::Absent, |tag| Resolution::Substituted(tag.clone()))
            }
            None => Resolution::Absent,
        };
        result.offsets.insert(offset.label.clone(), resolution);
    }

    result
}

/// Lists, filters and enriches the tags of one repository into the ordered
/// candidate sequence.
///
/// Tags are filtered by name before any per-tag metadata request, so dropped
/// tags never cost a request. Tags whose detail call reports not found
/// (deleted after listing) are skipped.
pub async fn collect_candidates(
    client: &dyn RegistryClient,
    cache: &MetadataCache,
    repository: &Repository,
    filter: &TagFilter,
    max_tags: Option<usize>,
) -> Result<Vec<Tag>, RegistryError> {
    let listing = client.list_tags(repository);
    let listing = match max_tags {
        Some(limit) => listing.take(limit).boxed(),
        None => listing,
    };

    let raw_tags: Vec<_> = listing
        .try_filter(|raw| future::ready(filter.accepts(&raw.name)))
        .try_collect()
        .await?;
    debug!("{}: {} tags passed the filter", repository, raw_tags.len());

    let mut tags = Vec::with_capacity(raw_tags.len());
    for raw in raw_tags {
        let name = match raw.into_tag() {
            Ok(tag) => {
                tags.push(tag);
                continue;
            }
            Err(name) => name,
        };

        let key = TagKey::new(repository, &name);
        match cache
            .get_or_fetch(key, || client.fetch_tag_metadata(repository, &name))
            .await
        {
            Ok(tag) => tags.push(tag),
            Err(RegistryError::NotFound(_)) => {
                warn!("{}: tag {} disappeared after listing", repository, name);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(order_candidates(tags))
}

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Resolves historical tags for repositories across the configured registries
#[derive(Clone)]
pub struct HistoricalResolver {
    clients: RegistryClients,
    cache: Arc<MetadataCache>,
    missing_timestamps: MissingTimestampPolicy,
    clock: Clock,
}

impl fmt::Debug for HistoricalResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoricalResolver")
            .field("registries", &self.clients.keys().collect::<Vec<_>>())
            .field("missing_timestamps", &self.missing_timestamps)
            .finish_non_exhaustive()
    }
}

impl HistoricalResolver {
    pub fn new(clients: RegistryClients) -> Self {
        Self {
            clients,
            cache: Arc::new(MetadataCache::new()),
            missing_timestamps: MissingTimestampPolicy::default(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_missing_timestamps(mut self, policy: MissingTimestampPolicy) -> Self {
        self.missing_timestamps = policy;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn client(&self, repository: &Repository) -> Result<&dyn RegistryClient, ResolveError> {
        self.clients
            .get(&repository.registry)
            .map(|client| client.as_ref())
            .ok_or(ResolveError::UnsupportedRegistry(repository.registry))
    }

    /// Returns the ordered, filtered and enriched tags of a repository
    pub async fn candidates(
        &self,
        repository: &Repository,
        policy: &FilterPolicy,
        max_tags: Option<usize>,
    ) -> Result<Vec<Tag>, ResolveError> {
        let filter = TagFilter::new(policy)?;
        let client = self.client(repository)?;
        Ok(collect_candidates(client, &self.cache, repository, &filter, max_tags).await?)
    }

    /// Resolves every offset of the request
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<ResolutionResult, ResolveError> {
        let now = (self.clock)();
        info!(
            "Resolving {} for {} offsets",
            request.repository,
            request.offsets.len()
        );

        let candidates = self
            .candidates(&request.repository, &request.filter, request.max_tags)
            .await?;

        let result = resolve_offsets(&candidates, &request.offsets, now, self.missing_timestamps);
        debug!(
            "{}: resolved {:?}",
            request.repository,
            result
                .offsets
                .iter()
                .map(|(label, r)| (label.as_str(), r.tag().map(|t| t.name.as_str())))
                .collect::<Vec<_>>()
        );
        Ok(result)
    }
}
