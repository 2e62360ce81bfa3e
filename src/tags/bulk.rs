//! Parallel resolution across many repositories

use std::collections::{HashMap, HashSet};

use futures::{StreamExt, stream};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::tags::error::ResolveError;
use crate::tags::resolver::{HistoricalResolver, ResolutionResult, ResolveRequest};
use crate::tags::types::Repository;

/// Per-repository outcomes in request order
pub type BulkOutcome = IndexMap<Repository, Result<ResolutionResult, ResolveError>>;

/// Counts over a bulk outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub resolved: usize,
    pub failed: usize,
}

impl Statistics {
    pub fn from_outcome(outcome: &BulkOutcome) -> Self {
        let failed = outcome.values().filter(|r| r.is_err()).count();
        Self {
            total: outcome.len(),
            resolved: outcome.len() - failed,
            failed,
        }
    }
}

/// Resolve many repositories with at most `workers` in flight
///
/// A failure only affects its own repository. Results come back in request
/// order regardless of completion order. A repository requested more than
/// once is resolved for its first request only.
pub async fn resolve_all(
    resolver: &HistoricalResolver,
    requests: Vec<ResolveRequest>,
    workers: usize,
) -> BulkOutcome {
    let mut seen = HashSet::new();
    let requests: Vec<_> = requests
        .into_iter()
        .filter(|request| {
            let first = seen.insert(request.repository.clone());
            if !first {
                warn!("Ignoring duplicate request for {}", request.repository);
            }
            first
        })
        .collect();

    let order: Vec<Repository> = requests.iter().map(|r| r.repository.clone()).collect();
    let total = requests.len();
    info!("Resolving {} repositories with {} workers", total, workers.max(1));

    let mut completed: HashMap<Repository, Result<ResolutionResult, ResolveError>> =
        stream::iter(requests)
            .map(|request| async move {
                let result = resolver.resolve(&request).await;
                (request.repository, result)
            })
            .buffer_unordered(workers.max(1))
            .enumerate()
            .map(|(i, (repository, result))| {
                match &result {
                    Ok(_) => info!("[{}/{}] Resolved {}", i + 1, total, repository),
                    Err(e) => error!("[{}/{}] Failed to resolve {}: {}", i + 1, total, repository, e),
                }
                (repository, result)
            })
            .collect()
            .await;

    order
        .into_iter()
        .filter_map(|repository| {
            completed
                .remove(&repository)
                .map(|result| (repository, result))
        })
        .collect()
}
