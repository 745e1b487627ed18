//! Remote HTTP artifact cache
//!
//! [`HttpCache`] turns task outputs into artifacts and moves them through an
//! [`ArtifactClient`]. It owns three concerns the transport does not:
//!
//! - admission control: every network operation holds a limiter slot for
//!   its whole lifetime, body transfer included
//! - artifact integrity: with signing enabled, uploads are tagged and
//!   downloads without a valid tag are rejected
//! - status interpretation: 404 is a miss, only 200 is a hit, anything else
//!   is an error (or `false`, for [`CacheBackend::exists`])
//!
//! Uploads are encoded on a blocking thread that writes into an in-process
//! pipe while the calling task drains it. The encoder reports its terminal
//! result on a oneshot channel that is always awaited, so a failing encoder
//! is never left behind.

use crate::archive::{ArchiveWriter, restore_archive};
use crate::backend::{CacheBackend, FetchResult, ItemStatus};
use crate::client::{
    ARTIFACT_DURATION_HEADER, ARTIFACT_TAG_HEADER, ApiClient, ArtifactClient, ArtifactResponse,
};
use crate::config::HttpCacheConfig;
use crate::events::{CacheEvent, CacheEventKind, CacheEventRecorder, CacheSource};
use crate::limiter::RequestLimiter;
use crate::signature::ArtifactSignature;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use secrecy::SecretString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};

/// Buffer size of the encoder pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Cache backend storing artifacts in a remote HTTP store
pub struct HttpCache {
    client: Arc<dyn ArtifactClient>,
    recorder: Arc<dyn CacheEventRecorder>,
    signature: ArtifactSignature,
    limiter: RequestLimiter,
    repo_root: PathBuf,
}

impl HttpCache {
    /// Create a cache over `client`, restoring artifacts into `repo_root`
    ///
    /// Signing starts disabled; see [`HttpCache::with_signing`].
    pub fn new(
        client: Arc<dyn ArtifactClient>,
        recorder: Arc<dyn CacheEventRecorder>,
        repo_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            recorder,
            signature: ArtifactSignature::Disabled,
            limiter: RequestLimiter::default(),
            repo_root: repo_root.into(),
        }
    }

    /// Build a cache backed by [`ApiClient`] from configuration
    pub fn from_config(
        config: &HttpCacheConfig,
        recorder: Arc<dyn CacheEventRecorder>,
        repo_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let client = ApiClient::new(config)?;
        let cache = Self::new(Arc::new(client), recorder, repo_root)
            .with_limiter(RequestLimiter::new(config.max_concurrent_requests));

        Ok(if config.signature {
            cache.with_signing(config.signature_key.clone())
        } else {
            cache
        })
    }

    /// Sign uploads and require valid tags on downloads
    ///
    /// Tags are bound to the client's team. A missing key makes every put
    /// and every fetch of an existing artifact fail.
    #[must_use]
    pub fn with_signing(mut self, key: Option<SecretString>) -> Self {
        self.signature = ArtifactSignature::enabled(self.client.team_id(), key);
        self
    }

    /// Replace the request limiter
    #[must_use]
    pub fn with_limiter(mut self, limiter: RequestLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// The limiter guarding network operations
    #[must_use]
    pub fn limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// The signature gate in effect
    #[must_use]
    pub fn signature(&self) -> &ArtifactSignature {
        &self.signature
    }

    async fn store(
        &self,
        anchor: &Path,
        hash: &str,
        duration: u64,
        files: &[PathBuf],
    ) -> Result<()> {
        let _slot = self.limiter.acquire().await?;

        let body = encode_artifact(anchor, files).await?;
        let tag = if self.signature.is_enabled() {
            Some(self.signature.generate_tag(hash, &body)?)
        } else {
            None
        };

        debug!(%hash, size = body.len(), files = files.len(), "Uploading artifact");
        self.client
            .put_artifact(hash, Bytes::from(body), duration, tag.as_deref())
            .await
    }

    async fn retrieve(&self, hash: &str) -> Result<FetchResult> {
        let _slot = self.limiter.acquire().await?;

        let response = self.client.fetch_artifact(hash).await?;
        let status = response.status;
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                debug!(%hash, "Artifact not found in remote cache");
                return Ok(FetchResult::miss());
            }
            status => return Err(unexpected_status(status, response).await),
        }

        let duration = parse_duration(response.header(ARTIFACT_DURATION_HEADER))?;

        let files = if self.signature.is_enabled() {
            let expected = response
                .header(ARTIFACT_TAG_HEADER)
                .filter(|tag| !tag.is_empty())
                .map(str::to_owned)
                .ok_or(Error::MissingTag)?;
            let body = response.bytes().await.map_err(Error::verification)?;

            let valid = self
                .signature
                .validate(hash, &body, &expected)
                .map_err(Error::verification)?;
            if !valid {
                return Err(Error::TagMismatch { expected });
            }
            self.restore(move |root| restore_archive(io::Cursor::new(body), root))
                .await?
        } else {
            let reader = SyncIoBridge::new(response.body);
            self.restore(move |root| restore_archive(reader, root)).await?
        };

        debug!(%hash, duration, files = files.len(), "Restored artifact from remote cache");
        Ok(FetchResult {
            status: ItemStatus::remote(true),
            files,
            duration,
        })
    }

    async fn restore<F>(&self, decode: F) -> Result<Vec<PathBuf>>
    where
        F: FnOnce(&Path) -> Result<Vec<PathBuf>> + Send + 'static,
    {
        let root = self.repo_root.clone();
        tokio::task::spawn_blocking(move || decode(&root))
            .await
            .map_err(|e| Error::archive(format!("artifact decoder task failed: {e}")))?
    }

    async fn probe(&self, hash: &str) -> Result<bool> {
        let _slot = self.limiter.acquire().await?;

        let response = self.client.artifact_exists(hash).await?;
        let status = response.status;
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected_status(status, response).await),
        }
    }

    fn log_fetch(&self, hash: &str, result: &FetchResult) {
        self.recorder.log_event(CacheEvent {
            source: CacheSource::Remote,
            event: CacheEventKind::from_hit(result.status.remote),
            hash: hash.to_string(),
            duration: result.duration,
        });
    }
}

#[async_trait]
impl CacheBackend for HttpCache {
    async fn put(
        &self,
        anchor: &Path,
        hash: &str,
        duration: u64,
        files: &[PathBuf],
    ) -> Result<()> {
        self.store(anchor, hash, duration, files)
            .await
            .map_err(Error::store)
    }

    /// Restores into the repo root; `root` and `tags` are ignored.
    async fn fetch(&self, _root: &Path, hash: &str, _tags: &[String]) -> Result<FetchResult> {
        let result = self.retrieve(hash).await.map_err(Error::retrieve)?;
        self.log_fetch(hash, &result);
        Ok(result)
    }

    async fn exists(&self, hash: &str) -> ItemStatus {
        match self.probe(hash).await {
            Ok(hit) => ItemStatus::remote(hit),
            Err(err) => {
                warn!(%hash, error = %err, "Remote cache existence check failed");
                ItemStatus::remote(false)
            }
        }
    }

    async fn clean(&self, _root: &Path) {}

    async fn clean_all(&self) {}

    async fn shutdown(&self) {}

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Encode `files` into an in-memory artifact
///
/// The encoder runs on a blocking thread writing into one end of a pipe; this
/// task reads the other end to completion.
async fn encode_artifact(anchor: &Path, files: &[PathBuf]) -> Result<Vec<u8>> {
    let (writer, mut reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (result_tx, result_rx) = oneshot::channel();

    let writer = SyncIoBridge::new(writer);
    let anchor = anchor.to_path_buf();
    let files = files.to_vec();
    let producer = tokio::task::spawn_blocking(move || {
        // The pipe end is dropped inside write_archive, so the reader sees EOF
        // before the result is sent.
        let result = write_archive(writer, &anchor, &files);
        let _ = result_tx.send(result);
    });

    let mut body = Vec::new();
    let read = reader.read_to_end(&mut body).await;
    // Unblocks the producer if the read stopped early.
    drop(reader);

    let encoded = result_rx
        .await
        .unwrap_or_else(|_| Err(Error::archive("artifact encoder exited without a result")));
    producer
        .await
        .map_err(|e| Error::archive(format!("artifact encoder task failed: {e}")))?;

    read.map_err(|e| Error::io_no_path(e, "read artifact stream"))?;
    encoded?;
    Ok(body)
}

fn write_archive<W: Write>(writer: W, anchor: &Path, files: &[PathBuf]) -> Result<()> {
    let mut archive = ArchiveWriter::new(writer)?;
    for file in files {
        archive.add_file(anchor, file)?;
    }
    archive.finish().map(drop)
}

/// Duration recorded with an artifact; an absent or empty header is zero
fn parse_duration(value: Option<&str>) -> Result<u64> {
    match value.map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => value.parse().map_err(|source| Error::InvalidDuration {
            value: value.to_string(),
            source,
        }),
    }
}

async fn unexpected_status(status: StatusCode, response: ArtifactResponse) -> Error {
    match response.text().await {
        Ok(text) if !text.is_empty() => Error::protocol(status.as_u16(), text),
        Ok(_) => Error::protocol(status.as_u16(), status.to_string()),
        Err(err) => err,
    }
}
