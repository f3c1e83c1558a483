use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineKind;

/// Centralized error type for fetch-engine.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The requested platform id has no known artifact mapping and no custom
    /// binary was provided for the engine.
    #[error("Unknown platform {0} and no custom binary was provided")]
    UnknownPlatform(String),

    /// A custom binary path was configured but the file is unusable.
    /// Custom binaries are never auto-healed.
    #[error("custom binary for {engine} at {} is invalid: {reason}", .path.display())]
    CustomBinaryInvalid {
        engine: EngineKind,
        path: PathBuf,
        reason: String,
    },

    /// Running the binary with `--version` failed or produced no version token.
    #[error("version probe of {} failed: {reason}", .path.display())]
    ProbeFailed { path: PathBuf, reason: String },

    /// Network, HTTP status, or decompression failure while fetching an artifact.
    #[error("download of {url} failed: {reason}")]
    TransportFailed { url: String, reason: String },

    /// The downloaded artifact failed verification even after a retry.
    #[error("downloaded {engine} for {platform} failed verification after retry: {reason}")]
    DownloadVerificationFailed {
        engine: EngineKind,
        platform: String,
        reason: String,
    },

    /// Another invocation on this host holds a fresh download lock.
    #[error("another process holds the download lock at {}", .path.display())]
    LockHeld { path: PathBuf },

    /// The overall operation timed out; in-flight downloads were aborted.
    #[error("engine fetch timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransportFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ProbeFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the orchestrator's single-retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::TransportFailed { .. } | FetchError::ProbeFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
