//! Artifact signing and verification
//!
//! Tags are `base64(HMAC-SHA256(key, {"hash","teamId"} || body))`, binding the
//! artifact body to both its hash and the team that produced it. The mode is
//! fixed when the cache is built: a disabled gate never signs and never asks
//! for tags, an enabled gate always does.

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactMetadata<'a> {
    hash: &'a str,
    team_id: &'a str,
}

/// Signature gate for remote artifacts
#[derive(Debug, Clone, Default)]
pub enum ArtifactSignature {
    /// Artifacts are neither signed nor verified
    #[default]
    Disabled,
    /// Every upload is signed and every download must carry a valid tag
    Enabled {
        /// Team the tags are bound to
        team_id: String,
        /// Shared signing key; tag operations fail while it is missing
        key: Option<SecretString>,
    },
}

impl ArtifactSignature {
    /// Build an enabled gate bound to `team_id`
    #[must_use]
    pub fn enabled(team_id: impl Into<String>, key: Option<SecretString>) -> Self {
        Self::Enabled {
            team_id: team_id.into(),
            key,
        }
    }

    /// Whether tags are generated and required
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Compute the tag for `body` stored under `hash`
    ///
    /// A disabled gate produces an empty tag.
    pub fn generate_tag(&self, hash: &str, body: &[u8]) -> Result<String> {
        if !self.is_enabled() {
            return Ok(String::new());
        }
        let mac = self.tag_generator(hash)?.chain_update(body);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Check `expected_tag` against `body` stored under `hash`
    ///
    /// A tag that is not valid base64 is a mismatch, not an error. A disabled
    /// gate accepts every tag.
    pub fn validate(&self, hash: &str, body: &[u8], expected_tag: &str) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(true);
        }
        let mac = self.tag_generator(hash)?.chain_update(body);
        let Ok(expected) = STANDARD.decode(expected_tag.trim()) else {
            return Ok(false);
        };
        Ok(mac.verify_slice(&expected).is_ok())
    }

    fn tag_generator(&self, hash: &str) -> Result<HmacSha256> {
        let Self::Enabled { team_id, key } = self else {
            return Err(Error::signature("artifact signing is disabled"));
        };
        let key = key.as_ref().ok_or_else(|| {
            Error::signature(
                "signature secret key not found; set CUENV_REMOTE_CACHE_SIGNATURE_KEY",
            )
        })?;
        let metadata = serde_json::to_vec(&ArtifactMetadata { hash, team_id })
            .map_err(|e| Error::serialization(format!("failed to encode tag metadata: {e}")))?;
        let mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
            .map_err(|e| Error::signature(format!("invalid signature key: {e}")))?;
        Ok(mac.chain_update(metadata))
    }
}
