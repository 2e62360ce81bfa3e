//! Common types for registries, repositories and tags

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of container registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// Docker Hub (hub.docker.com)
    #[serde(alias = "docker")]
    DockerHub,
    /// Microsoft Container Registry (mcr.microsoft.com)
    Mcr,
    /// Chainguard registry (cgr.dev)
    Chainguard,
}

impl RegistryKind {
    /// Returns the string representation of the registry kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::DockerHub => "docker_hub",
            RegistryKind::Mcr => "mcr",
            RegistryKind::Chainguard => "chainguard",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker_hub" | "docker" | "dockerhub" => Ok(RegistryKind::DockerHub),
            "mcr" => Ok(RegistryKind::Mcr),
            "chainguard" | "cgr" => Ok(RegistryKind::Chainguard),
            other => Err(format!("unknown registry: {other}")),
        }
    }
}

/// A repository within a registry, e.g. `library/python` on Docker Hub
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Repository {
    pub registry: RegistryKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl Repository {
    pub fn new(registry: RegistryKind, name: impl Into<String>) -> Self {
        Self {
            registry,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Path of the repository relative to the registry (`namespace/name` or `name`)
    pub fn path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.path())
    }
}

/// Creation time, digest and size of a tag
///
/// Every field is optional because registries disagree on what they report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub digest: Option<String>,
    pub size_bytes: Option<u64>,
}

/// A tag entry as produced by a registry listing
///
/// `metadata` is `Some` when the listing already embeds it (Docker Hub) and
/// `None` when a per-tag detail call is needed (OCI distribution registries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTag {
    pub name: String,
    pub metadata: Option<TagMetadata>,
}

impl RawTag {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(name: impl Into<String>, metadata: TagMetadata) -> Self {
        Self {
            name: name.into(),
            metadata: Some(metadata),
        }
    }

    /// Converts into a [`Tag`] if the listing already carried the metadata
    pub fn into_tag(self) -> Result<Tag, String> {
        match self.metadata {
            Some(metadata) => Ok(Tag::new(self.name, metadata)),
            None => Err(self.name),
        }
    }
}

/// An image tag with its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub digest: Option<String>,
    pub size_bytes: Option<u64>,
}

impl Tag {
    pub fn new(name: impl Into<String>, metadata: TagMetadata) -> Self {
        Self {
            name: name.into(),
            created_at: metadata.created_at,
            digest: metadata.digest,
            size_bytes: metadata.size_bytes,
        }
    }
}

/// Key of the shared tag metadata cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagKey {
    pub repository: Repository,
    pub tag: String,
}

impl TagKey {
    pub fn new(repository: &Repository, tag: &str) -> Self {
        Self {
            repository: repository.clone(),
            tag: tag.to_string(),
        }
    }
}

/// A named number of days in the past to resolve a tag for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffset {
    #[serde(alias = "name")]
    pub label: String,
    pub offset_days: u32,
}

impl TimeOffset {
    pub fn new(label: impl Into<String>, offset_days: u32) -> Self {
        Self {
            label: label.into(),
            offset_days,
        }
    }

    pub fn is_current(&self) -> bool {
        self.offset_days == 0
    }
}
