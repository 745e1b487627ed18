//! Admission control: at most N remote operations are in flight at once

use async_trait::async_trait;
use bytes::Bytes;
use cuenv_http_cache::{
    ArtifactClient, ArtifactResponse, CacheBackend, DEFAULT_MAX_CONCURRENT_REQUESTS, HttpCache,
    NoopRecorder, RequestLimiter, Result,
};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Client whose calls park until the test opens the gate
struct GatedClient {
    gate: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    async fn hold(&self, status: StatusCode) -> Result<ArtifactResponse> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let permit = self.gate.acquire().await.unwrap();
        permit.forget();
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ArtifactResponse::empty(status))
    }

    async fn wait_for_active(&self, expected: usize) {
        for _ in 0..400 {
            if self.active.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {expected} active requests, saw {}",
            self.active.load(Ordering::SeqCst)
        );
    }
}

#[async_trait]
impl ArtifactClient for GatedClient {
    async fn put_artifact(
        &self,
        _hash: &str,
        _body: Bytes,
        _duration: u64,
        _tag: Option<&str>,
    ) -> Result<()> {
        self.hold(StatusCode::OK).await.map(drop)
    }

    async fn fetch_artifact(&self, _hash: &str) -> Result<ArtifactResponse> {
        self.hold(StatusCode::NOT_FOUND).await
    }

    async fn artifact_exists(&self, _hash: &str) -> Result<ArtifactResponse> {
        self.hold(StatusCode::OK).await
    }

    fn team_id(&self) -> &str {
        ""
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_requests_are_capped() {
    let root = TempDir::new().unwrap();
    let client = GatedClient::new();
    let cache = Arc::new(HttpCache::new(
        Arc::clone(&client) as Arc<dyn ArtifactClient>,
        Arc::new(NoopRecorder),
        root.path(),
    ));
    let extra = 7;
    let total = DEFAULT_MAX_CONCURRENT_REQUESTS + extra;

    let mut handles = Vec::new();
    for i in 0..total {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                cache.fetch(Path::new("."), "abc123", &[]).await.map(|r| r.status.is_hit())
            } else {
                Ok(cache.exists("abc123").await.is_hit())
            }
        }));
    }

    client.wait_for_active(DEFAULT_MAX_CONCURRENT_REQUESTS).await;
    // Give the queued callers a chance to overrun the limit.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        client.active.load(Ordering::SeqCst),
        DEFAULT_MAX_CONCURRENT_REQUESTS
    );
    assert_eq!(cache.limiter().available(), 0);

    client.gate.add_permits(total);
    for (i, handle) in handles.into_iter().enumerate() {
        let hit = handle.await.unwrap().unwrap();
        assert_eq!(hit, i % 2 == 1);
    }

    assert_eq!(client.peak.load(Ordering::SeqCst), DEFAULT_MAX_CONCURRENT_REQUESTS);
    assert_eq!(cache.limiter().available(), DEFAULT_MAX_CONCURRENT_REQUESTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_custom_limit_and_slot_release_on_cancel() {
    let root = TempDir::new().unwrap();
    let client = GatedClient::new();
    let cache = Arc::new(
        HttpCache::new(
            Arc::clone(&client) as Arc<dyn ArtifactClient>,
            Arc::new(NoopRecorder),
            root.path(),
        )
        .with_limiter(RequestLimiter::new(2)),
    );

    let mut handles = Vec::new();
    for _ in 0..3 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.exists("abc123").await }));
    }
    client.wait_for_active(2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.active.load(Ordering::SeqCst), 2);

    // Aborting every caller must hand all slots back.
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }
    assert_eq!(cache.limiter().available(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_put_holds_a_slot_through_upload() {
    let src = TempDir::new().unwrap();
    std::fs::write(src.path().join("out.txt"), "done").unwrap();
    let client = GatedClient::new();
    let cache = Arc::new(
        HttpCache::new(
            Arc::clone(&client) as Arc<dyn ArtifactClient>,
            Arc::new(NoopRecorder),
            src.path(),
        )
        .with_limiter(RequestLimiter::new(1)),
    );

    let uploader = {
        let cache = Arc::clone(&cache);
        let anchor = src.path().to_path_buf();
        tokio::spawn(async move {
            cache
                .put(&anchor, "abc123", 5, &[PathBuf::from("out.txt")])
                .await
        })
    };
    client.wait_for_active(1).await;
    assert_eq!(cache.limiter().available(), 0);

    client.gate.add_permits(1);
    uploader.await.unwrap().unwrap();
    assert_eq!(cache.limiter().available(), 1);
}
