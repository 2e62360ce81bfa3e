//! Tag history layer for container registries
//!
//! This module lists the tags of a repository, filters and orders them into
//! candidates, and selects the tag that was current at each requested point
//! in the past (Docker Hub, MCR, Chainguard).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Registry   │────▶│   Filter    │────▶│  Resolver   │
//! │  (list)     │     │ (candidates)│     │  (offsets)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   ▲
//!        ▼                   ▼                   │
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Http     │     │    Cache    │     │    Bulk     │
//! │(rate, retry)│     │ (metadata)  │     │  (workers)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: Registry client trait producing lazy tag streams
//! - [`registries`]: Docker Hub and OCI distribution (MCR, Chainguard) clients
//! - [`http`]: Shared HTTP transport with status mapping
//! - [`rate_limit`]: Per-registry rate limiter and retry policy
//! - [`filter`]: Tag filter policy and candidate ordering
//! - [`semver`]: Tag name to version parsing
//! - [`cache`]: In-memory tag metadata cache
//! - [`resolver`]: Historical resolution for one repository
//! - [`bulk`]: Bounded parallel resolution across repositories
//! - [`error`]: Error types for registry access and resolution
//! - [`types`]: Common types like `Repository` and `Tag`

pub mod bulk;
pub mod cache;
pub mod error;
pub mod filter;
pub mod http;
pub mod rate_limit;
pub mod registries;
pub mod registry;
pub mod resolver;
pub mod semver;
pub mod types;
