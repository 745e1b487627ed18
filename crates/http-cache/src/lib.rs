//! Remote artifact caching for cuenv
//!
//! This crate moves task outputs between a workspace and an artifact store:
//! - [`HttpCache`]: remote store reached over the `/v8/artifacts` HTTP API
//! - [`FsCache`]: local on-disk store with the same interface
//! - Artifact codec (zstd-compressed tar with normalized headers)
//! - Optional HMAC artifact signing with fail-closed verification
//!
//! # Overview
//!
//! Both backends implement [`CacheBackend`]. A fetch that finds nothing is a
//! miss, never an error. Remote operations pass through a bounded
//! [`RequestLimiter`] so a large task graph cannot flood the store, and every
//! fetch outcome is reported to a [`CacheEventRecorder`].
//!
//! # Configuration
//!
//! [`HttpCacheConfig::from_env`] reads the `CUENV_REMOTE_CACHE_*` variables;
//! [`HttpCache::from_config`] builds a ready-to-use cache from it.

#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod archive;
pub mod backend;
pub mod client;
pub mod config;
mod error;
pub mod events;
pub mod fs;
pub mod http;
pub mod limiter;
pub mod retry;
pub mod signature;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use backend::{CacheBackend, FetchResult, ItemStatus};
pub use client::{ApiClient, ArtifactClient, ArtifactResponse};
pub use config::{HttpCacheConfig, RetryConfig};
pub use events::{
    CacheEvent, CacheEventKind, CacheEventRecorder, CacheSource, ChannelRecorder, NoopRecorder,
    TracingRecorder,
};
pub use fs::FsCache;
pub use http::HttpCache;
pub use limiter::{DEFAULT_MAX_CONCURRENT_REQUESTS, RequestLimiter, RequestSlot};
pub use signature::ArtifactSignature;
