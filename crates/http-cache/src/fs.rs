//! Local filesystem artifact cache
//!
//! Stores each artifact as `<hash>.tar.zst` next to a `<hash>-meta.json`
//! sidecar holding the recorded duration. Both files are written through a
//! temp file in the cache directory and renamed into place, so readers never
//! see a partial artifact.

use crate::archive::{ArchiveWriter, restore_archive};
use crate::backend::{CacheBackend, FetchResult, ItemStatus};
use crate::events::{CacheEvent, CacheEventKind, CacheEventRecorder, CacheSource};
use crate::{Error, Result};
use async_trait::async_trait;
use dirs::cache_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactMeta {
    hash: String,
    duration: u64,
}

/// Inputs for resolving the artifact directory
#[derive(Debug, Clone)]
struct ArtifactDirInputs {
    explicit: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn artifact_dir_from_inputs(inputs: ArtifactDirInputs) -> Result<PathBuf> {
    // First writable candidate wins:
    // 1) explicit directory
    // 2) XDG_CACHE_HOME/cuenv/artifacts
    // 3) OS cache dir/cuenv/artifacts
    // 4) TMPDIR/cuenv/artifacts
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.explicit.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("cuenv/artifacts"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("cuenv/artifacts"));
    }
    candidates.push(inputs.temp_dir.join("cuenv/artifacts"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        if fs::create_dir_all(&path).is_ok() && is_writable(&path) {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable artifact cache directory",
    ))
}

fn is_writable(dir: &Path) -> bool {
    NamedTempFile::new_in(dir).is_ok()
}

fn validate_hash(hash: &str) -> Result<()> {
    if hash.is_empty() || hash == "." || hash == ".." || hash.contains(['/', '\\', '\0']) {
        return Err(Error::configuration(format!(
            "invalid artifact hash '{hash}': must be a single path component"
        )));
    }
    Ok(())
}

/// Cache backend storing artifacts on local disk
pub struct FsCache {
    dir: PathBuf,
    recorder: Arc<dyn CacheEventRecorder>,
}

impl FsCache {
    /// Create a cache, resolving the directory when `dir` is `None`
    pub fn new(dir: Option<PathBuf>, recorder: Arc<dyn CacheEventRecorder>) -> Result<Self> {
        let dir = artifact_dir_from_inputs(ArtifactDirInputs {
            explicit: dir,
            xdg_cache_home: std::env::var("XDG_CACHE_HOME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            os_cache_dir: cache_dir(),
            temp_dir: std::env::temp_dir(),
        })?;
        debug!(dir = %dir.display(), "Using local artifact cache");
        Ok(Self { dir, recorder })
    }

    /// Directory holding the artifacts
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact and metadata paths for `hash`, both directly inside the cache dir
    fn entry_paths(&self, hash: &str) -> Result<(PathBuf, PathBuf)> {
        validate_hash(hash)?;
        Ok((
            self.dir.join(format!("{hash}.tar.zst")),
            self.dir.join(format!("{hash}-meta.json")),
        ))
    }

    fn log_fetch(&self, hash: &str, result: &FetchResult) {
        self.recorder.log_event(CacheEvent {
            source: CacheSource::Local,
            event: CacheEventKind::from_hit(result.status.local),
            hash: hash.to_string(),
            duration: result.duration,
        });
    }
}

#[async_trait]
impl CacheBackend for FsCache {
    async fn put(&self, anchor: &Path, hash: &str, duration: u64, files: &[PathBuf]) -> Result<()> {
        let (artifact_path, meta_path) = self.entry_paths(hash).map_err(Error::store)?;
        let dir = self.dir.clone();
        let anchor = anchor.to_path_buf();
        let files = files.to_vec();
        let meta = ArtifactMeta {
            hash: hash.to_string(),
            duration,
        };

        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;

            let temp = NamedTempFile::new_in(&dir).map_err(|e| Error::io(e, &dir, "create"))?;
            let mut archive = ArchiveWriter::new(BufWriter::new(temp))?;
            for file in &files {
                archive.add_file(&anchor, file)?;
            }
            let temp = archive
                .finish()?
                .into_inner()
                .map_err(|e| Error::io(e.into_error(), &artifact_path, "flush"))?;
            persist(temp, &artifact_path)?;

            let mut temp =
                NamedTempFile::new_in(&dir).map_err(|e| Error::io(e, &dir, "create"))?;
            serde_json::to_writer(&mut temp, &meta)
                .map_err(|e| Error::serialization(format!("failed to write metadata: {e}")))?;
            temp.flush().map_err(|e| Error::io(e, &meta_path, "flush"))?;
            persist(temp, &meta_path)
        })
        .await
        .map_err(|e| Error::archive(format!("local cache writer task failed: {e}")))?
        .map_err(Error::store)?;

        debug!(%hash, duration, "Stored artifact in local cache");
        Ok(())
    }

    async fn fetch(&self, root: &Path, hash: &str, _tags: &[String]) -> Result<FetchResult> {
        let (artifact_path, meta_path) = self.entry_paths(hash).map_err(Error::retrieve)?;
        let root = root.to_path_buf();

        let result = tokio::task::spawn_blocking(move || -> Result<FetchResult> {
            if !artifact_path.is_file() || !meta_path.is_file() {
                return Ok(FetchResult::miss());
            }
            let raw = fs::read(&meta_path).map_err(|e| Error::io(e, &meta_path, "read"))?;
            let meta: ArtifactMeta = serde_json::from_slice(&raw)
                .map_err(|e| Error::serialization(format!("invalid artifact metadata: {e}")))?;
            let file =
                fs::File::open(&artifact_path).map_err(|e| Error::io(e, &artifact_path, "open"))?;
            let files = restore_archive(file, &root)?;
            Ok(FetchResult {
                status: ItemStatus::local(true),
                files,
                duration: meta.duration,
            })
        })
        .await
        .map_err(|e| Error::archive(format!("local cache reader task failed: {e}")))?
        .map_err(Error::retrieve)?;

        self.log_fetch(hash, &result);
        Ok(result)
    }

    async fn exists(&self, hash: &str) -> ItemStatus {
        let Ok((artifact_path, meta_path)) = self.entry_paths(hash) else {
            return ItemStatus::local(false);
        };
        ItemStatus::local(artifact_path.is_file() && meta_path.is_file())
    }

    async fn clean(&self, _root: &Path) {}

    async fn clean_all(&self) {
        let dir = self.dir.clone();
        let removed = tokio::task::spawn_blocking(move || fs::remove_dir_all(&dir)).await;
        match removed {
            Ok(Ok(())) => debug!(dir = %self.dir.display(), "Removed local artifact cache"),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Ok(Err(e)) => warn!(
                dir = %self.dir.display(),
                error = %e,
                "Failed to clean local artifact cache"
            ),
            Err(e) => warn!(error = %e, "Local cache cleaner task failed"),
        }
    }

    async fn shutdown(&self) {}

    fn name(&self) -> &'static str {
        "fs"
    }
}

fn persist(temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.persist(path)
        .map(drop)
        .map_err(|e| Error::io(e.error, path, "rename"))
}
