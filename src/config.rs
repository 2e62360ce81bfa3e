use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tags::error::ConfigError;
use crate::tags::filter::FilterPolicy;
use crate::tags::rate_limit::RetryPolicy;
use crate::tags::registries::{docker_hub, oci};
use crate::tags::resolver::{MissingTimestampPolicy, ResolveRequest};
use crate::tags::types::{RegistryKind, Repository, TimeOffset};

// =============================================================================
// Concurrency and network constants
// =============================================================================

/// Default number of repositories resolved concurrently
pub const DEFAULT_WORKERS: usize = 5;

/// Timeout for a single registry request in milliseconds (30 seconds)
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Attempts per request, including the first one
pub const RETRY_MAX_ATTEMPTS: u32 = 4;

/// Delay before the first retry in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound of the retry backoff in milliseconds
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Longest server-requested `Retry-After` wait that is honored, in milliseconds
pub const RETRY_AFTER_CEILING_MS: u64 = 300_000;

// =============================================================================
// Per-registry request spacing
// =============================================================================

/// Minimum interval between Docker Hub requests in milliseconds
pub const DOCKER_HUB_MIN_INTERVAL_MS: u64 = 1_000;

/// Minimum interval between MCR requests in milliseconds
pub const MCR_MIN_INTERVAL_MS: u64 = 500;

/// Minimum interval between Chainguard requests in milliseconds
pub const CHAINGUARD_MIN_INTERVAL_MS: u64 = 1_000;

/// Periods resolved when none are configured
pub fn default_periods() -> Vec<TimeOffset> {
    vec![
        TimeOffset::new("current", 0),
        TimeOffset::new("six_months_ago", 180),
        TimeOffset::new("one_year_ago", 365),
    ]
}

/// Resolver configuration file
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    pub workers: usize,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub registries: RegistriesConfig,
    pub periods: Vec<TimeOffset>,
    pub missing_timestamps: MissingTimestampPolicy,
    /// Stop listing a repository after this many tags
    pub max_tags: Option<usize>,
    pub targets: Vec<TargetConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            retry: RetryConfig::default(),
            registries: RegistriesConfig::default(),
            periods: default_periods(),
            missing_timestamps: MissingTimestampPolicy::default(),
            max_tags: None,
            targets: Vec::new(),
        }
    }
}

impl ResolverConfig {
    /// Reads a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// One resolution request per configured target
    ///
    /// Targets without their own periods use the global ones.
    pub fn requests(&self) -> Vec<ResolveRequest> {
        self.targets
            .iter()
            .map(|target| {
                let periods = target.periods.clone().unwrap_or_else(|| self.periods.clone());
                ResolveRequest::new(target.repository(), periods)
                    .with_filter(target.filter.clone())
                    .with_max_tags(self.max_tags)
            })
            .collect()
    }
}

/// Retry configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retry_after_ceiling_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay_ms: RETRY_BASE_DELAY_MS,
            max_delay_ms: RETRY_MAX_DELAY_MS,
            retry_after_ceiling_ms: RETRY_AFTER_CEILING_MS,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            retry_after_ceiling: Duration::from_millis(self.retry_after_ceiling_ms),
        }
    }
}

/// Registry-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RegistriesConfig {
    pub docker_hub: RegistryConfig,
    pub mcr: RegistryConfig,
    pub chainguard: RegistryConfig,
}

/// Individual registry configuration; unset fields use the registry's defaults
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_url: Option<String>,
    pub min_interval_ms: Option<u64>,
}

impl RegistriesConfig {
    pub fn get(&self, kind: RegistryKind) -> &RegistryConfig {
        match kind {
            RegistryKind::DockerHub => &self.docker_hub,
            RegistryKind::Mcr => &self.mcr,
            RegistryKind::Chainguard => &self.chainguard,
        }
    }

    pub fn base_url(&self, kind: RegistryKind) -> String {
        self.get(kind).base_url.clone().unwrap_or_else(|| {
            match kind {
                RegistryKind::DockerHub => docker_hub::DEFAULT_BASE_URL,
                RegistryKind::Mcr => oci::MCR_BASE_URL,
                RegistryKind::Chainguard => oci::CHAINGUARD_BASE_URL,
            }
            .to_string()
        })
    }

    pub fn min_interval_ms(&self, kind: RegistryKind) -> u64 {
        self.get(kind)
            .min_interval_ms
            .unwrap_or(match kind {
                RegistryKind::DockerHub => DOCKER_HUB_MIN_INTERVAL_MS,
                RegistryKind::Mcr => MCR_MIN_INTERVAL_MS,
                RegistryKind::Chainguard => CHAINGUARD_MIN_INTERVAL_MS,
            })
    }

    /// Applies one request interval to every registry
    pub fn override_min_interval_ms(&mut self, interval_ms: u64) {
        for registry in [&mut self.docker_hub, &mut self.mcr, &mut self.chainguard] {
            registry.min_interval_ms = Some(interval_ms);
        }
    }
}

/// A repository to resolve in bulk
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TargetConfig {
    pub registry: RegistryKind,
    pub repository: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub filter: FilterPolicy,
    #[serde(default)]
    pub periods: Option<Vec<TimeOffset>>,
}

impl TargetConfig {
    pub fn repository(&self) -> Repository {
        let repository = Repository::new(self.registry, &self.repository);
        match &self.namespace {
            Some(ns) => repository.with_namespace(ns),
            None => repository,
        }
    }
}

/// Returns the path to the data directory for tag-history.
/// Uses $XDG_DATA_HOME/tag-history if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/tag-history,
/// or ./tag-history if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("tag-history.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("tag-history")
}
