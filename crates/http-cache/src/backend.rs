//! Cache Backend Abstraction
//!
//! Defines the `CacheBackend` trait shared by the remote HTTP cache and the
//! local filesystem cache, so the task runner can pick one without caring
//! where artifacts live.

use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Where an artifact was found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemStatus {
    /// Present in the local cache
    pub local: bool,
    /// Present in the remote cache
    pub remote: bool,
}

impl ItemStatus {
    /// Status for a remote lookup
    #[must_use]
    pub fn remote(hit: bool) -> Self {
        Self {
            local: false,
            remote: hit,
        }
    }

    /// Status for a local lookup
    #[must_use]
    pub fn local(hit: bool) -> Self {
        Self {
            local: hit,
            remote: false,
        }
    }

    /// Whether any backend has the artifact
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.local || self.remote
    }
}

/// Outcome of a fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    /// Where the artifact was found
    pub status: ItemStatus,
    /// Restored paths, relative to the restore root
    pub files: Vec<PathBuf>,
    /// Duration recorded when the artifact was stored
    pub duration: u64,
}

impl FetchResult {
    /// A miss: no files, zero duration
    #[must_use]
    pub fn miss() -> Self {
        Self::default()
    }
}

/// Cache backend trait for pluggable artifact caches
///
/// Implementations must be thread-safe (`Send + Sync`) for concurrent task execution.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store `files` (relative to `anchor`) under `hash`
    async fn put(&self, anchor: &Path, hash: &str, duration: u64, files: &[PathBuf]) -> Result<()>;

    /// Restore the artifact stored under `hash`
    ///
    /// A missing artifact is a miss, never an error.
    async fn fetch(&self, root: &Path, hash: &str, tags: &[String]) -> Result<FetchResult>;

    /// Probe for `hash`; failures are reported as absent
    async fn exists(&self, hash: &str) -> ItemStatus;

    /// Drop cached state for `root`
    async fn clean(&self, root: &Path);

    /// Drop all cached state
    async fn clean_all(&self);

    /// Release resources at the end of a run
    async fn shutdown(&self);

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
