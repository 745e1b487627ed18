//! Error types for the HTTP cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::num::ParseIntError;
use std::path::Path;
use thiserror::Error;

/// Error type for remote and local artifact cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The request never produced a response (connect failure, timeout, broken body stream)
    #[error("Remote cache transport error: {message}")]
    #[diagnostic(
        code(cuenv::http_cache::transport),
        help("Check network connectivity and the configured remote cache URL")
    )]
    Transport {
        /// Description of the transport failure
        message: String,
    },

    /// The remote store answered with a status other than success or not-found
    #[error("{message}")]
    #[diagnostic(code(cuenv::http_cache::protocol))]
    Protocol {
        /// HTTP status code returned by the remote store
        status: u16,
        /// Response body, used as diagnostic text
        message: String,
    },

    /// The duration header was present but not an integer
    #[error("invalid x-artifact-duration header '{value}': {source}")]
    #[diagnostic(code(cuenv::http_cache::invalid_duration))]
    InvalidDuration {
        /// Raw header value
        value: String,
        /// Parse failure
        #[source]
        source: ParseIntError,
    },

    /// Verification is enabled but the response carried no tag
    #[error(
        "artifact verification failed: Downloaded artifact is missing required x-artifact-tag header"
    )]
    #[diagnostic(
        code(cuenv::http_cache::missing_tag),
        help("The artifact was uploaded without signing; re-upload it with signing enabled")
    )]
    MissingTag,

    /// The tag computed over the downloaded body does not match the header
    #[error("artifact verification failed: artifact tag does not match expected tag {expected}")]
    #[diagnostic(code(cuenv::http_cache::tag_mismatch))]
    TagMismatch {
        /// Tag presented by the remote store
        expected: String,
    },

    /// Tag validation could not be carried out
    #[error("artifact verification failed: {source}")]
    #[diagnostic(code(cuenv::http_cache::verification))]
    Verification {
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Tag generation failed
    #[error("Artifact signature error: {message}")]
    #[diagnostic(
        code(cuenv::http_cache::signature),
        help("Set CUENV_REMOTE_CACHE_SIGNATURE_KEY when signature verification is enabled")
    )]
    Signature {
        /// Description of the signing failure
        message: String,
    },

    /// Artifact archive could not be written or restored
    #[error("Artifact archive error: {message}")]
    #[diagnostic(code(cuenv::http_cache::archive))]
    Archive {
        /// Description of the codec failure
        message: String,
    },

    /// I/O error during cache operations
    #[error(
        "I/O {operation} failed{}",
        path.as_ref().map_or(String::new(), |p| format!(": {}", p.display()))
    )]
    #[diagnostic(
        code(cuenv::http_cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Remote cache configuration error: {message}")]
    #[diagnostic(code(cuenv::http_cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(cuenv::http_cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// A Put failed
    #[error("failed to store files in HTTP cache: {source}")]
    #[diagnostic(code(cuenv::http_cache::store))]
    Store {
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A Fetch failed
    #[error("failed to retrieve files from HTTP cache: {source}")]
    #[diagnostic(code(cuenv::http_cache::retrieve))]
    Retrieve {
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a transport error
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// Create a protocol error from a status code and response body
    #[must_use]
    pub fn protocol(status: u16, body: impl Into<String>) -> Self {
        Self::Protocol {
            status,
            message: body.into(),
        }
    }

    /// Create a signature error
    #[must_use]
    pub fn signature(msg: impl Into<String>) -> Self {
        Self::Signature {
            message: msg.into(),
        }
    }

    /// Create an archive error
    #[must_use]
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Wrap as a Put failure
    #[must_use]
    pub fn store(self) -> Self {
        Self::Store {
            source: Box::new(self),
        }
    }

    /// Wrap as a Fetch failure
    #[must_use]
    pub fn retrieve(self) -> Self {
        Self::Retrieve {
            source: Box::new(self),
        }
    }

    /// Wrap as a verification failure
    #[must_use]
    pub fn verification(self) -> Self {
        Self::Verification {
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any `Store`/`Retrieve` context wrappers
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Store { source } | Self::Retrieve { source } => source.root(),
            other => other,
        }
    }

    /// Whether the failure is an integrity failure (missing tag, mismatch, failed validation)
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(
            self.root(),
            Self::MissingTag | Self::TagMismatch { .. } | Self::Verification { .. }
        )
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_context() {
        let err = Error::MissingTag.retrieve();
        assert!(matches!(err.root(), Error::MissingTag));
        assert!(err.is_integrity());
        assert!(err.to_string().starts_with("failed to retrieve files from HTTP cache"));
    }

    #[test]
    fn test_protocol_displays_body() {
        let err = Error::protocol(500, "internal failure");
        assert_eq!(err.to_string(), "internal failure");
        assert!(!err.is_integrity());
    }

    #[test]
    fn test_io_with_path() {
        let err = Error::io(std::io::Error::other("disk full"), "/tmp/x", "write");
        let msg = err.to_string();
        assert!(msg.contains("write"));
        assert!(msg.contains("/tmp/x"));
    }
}
