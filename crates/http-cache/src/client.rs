//! Artifact transport
//!
//! [`ArtifactClient`] is the seam between the cache and the network: the
//! cache only ever sees status codes, headers and a body stream. [`ApiClient`]
//! implements it against the `/v8/artifacts` HTTP API.

use crate::config::{HttpCacheConfig, RetryConfig};
use crate::retry::retry_with_backoff;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::debug;

/// Header carrying the recorded task duration
pub const ARTIFACT_DURATION_HEADER: &str = "x-artifact-duration";
/// Header carrying the artifact tag
pub const ARTIFACT_TAG_HEADER: &str = "x-artifact-tag";

const USER_AGENT: &str = concat!("cuenv/", env!("CARGO_PKG_VERSION"));

/// Streaming response body
pub type ArtifactBody = Pin<Box<dyn AsyncRead + Send>>;

/// Status, headers and body of an artifact request
pub struct ArtifactResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body, not yet read
    pub body: ArtifactBody,
}

impl ArtifactResponse {
    /// Wrap a streaming body
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self {
            status,
            headers,
            body: Box::pin(body),
        }
    }

    /// Wrap an in-memory body
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, io::Cursor::new(body.into()))
    }

    /// A response without a body
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self::from_bytes(status, HeaderMap::new(), Bytes::new())
    }

    /// Header value as a string, if present and valid
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Read the whole body into memory
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::transport(format!("failed to read response body: {e}")))?;
        Ok(buf)
    }

    /// Read the whole body as (lossy) UTF-8 text
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for ArtifactResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Transport used by the remote cache
///
/// Implementations own authentication, retries and timeouts; the cache
/// interprets whatever status comes back.
#[async_trait]
pub trait ArtifactClient: Send + Sync {
    /// Upload `body` under `hash`
    async fn put_artifact(
        &self,
        hash: &str,
        body: Bytes,
        duration: u64,
        tag: Option<&str>,
    ) -> Result<()>;

    /// Download the artifact stored under `hash`
    async fn fetch_artifact(&self, hash: &str) -> Result<ArtifactResponse>;

    /// Probe for the artifact stored under `hash`
    async fn artifact_exists(&self, hash: &str) -> Result<ArtifactResponse>;

    /// Team the client is scoped to (empty when unscoped)
    fn team_id(&self) -> &str;
}

/// HTTP client for the `/v8/artifacts` API
#[derive(Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
    team_id: Option<String>,
    team_slug: Option<String>,
    retry: RetryConfig,
}

impl ApiClient {
    /// Build a client from cache configuration
    pub fn new(config: &HttpCacheConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            team_id: config.team_id.clone(),
            team_slug: config.team_slug.clone(),
            retry: config.retry.clone(),
        })
    }

    fn request(&self, method: Method, hash: &str) -> RequestBuilder {
        let url = format!("{}/v8/artifacts/{hash}", self.base_url);
        let mut request = self.client.request(method, url);

        if let Some(team_id) = &self.team_id {
            request = request.query(&[("teamId", team_id)]);
        } else if let Some(slug) = &self.team_slug {
            request = request.query(&[("slug", slug)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        request
    }

    async fn send<F>(&self, operation: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        retry_with_backoff(&self.retry, operation, || {
            let request = build();
            async move { request.send().await.map_err(transport_error) }
        })
        .await
    }
}

#[async_trait]
impl ArtifactClient for ApiClient {
    async fn put_artifact(
        &self,
        hash: &str,
        body: Bytes,
        duration: u64,
        tag: Option<&str>,
    ) -> Result<()> {
        debug!(%hash, size = body.len(), duration, "Uploading artifact");

        let response = self
            .send("put_artifact", || {
                let mut request = self
                    .request(Method::PUT, hash)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .header(ARTIFACT_DURATION_HEADER, duration.to_string())
                    .body(body.clone());
                if let Some(tag) = tag.filter(|t| !t.is_empty()) {
                    request = request.header(ARTIFACT_TAG_HEADER, tag);
                }
                request
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(Error::protocol(
            status.as_u16(),
            if text.is_empty() {
                status.to_string()
            } else {
                text
            },
        ))
    }

    async fn fetch_artifact(&self, hash: &str) -> Result<ArtifactResponse> {
        let response = self
            .send("fetch_artifact", || self.request(Method::GET, hash))
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = StreamReader::new(response.bytes_stream().map_err(io::Error::other));
        Ok(ArtifactResponse::new(status, headers, body))
    }

    async fn artifact_exists(&self, hash: &str) -> Result<ArtifactResponse> {
        let response = self
            .send("artifact_exists", || self.request(Method::HEAD, hash))
            .await?;

        let mut exists = ArtifactResponse::empty(response.status());
        exists.headers = response.headers().clone();
        Ok(exists)
    }

    fn team_id(&self) -> &str {
        self.team_id.as_deref().unwrap_or_default()
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    Error::transport(err.to_string())
}
