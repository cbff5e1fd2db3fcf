use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Structured form of an error, as written to the failure log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: &'static str,
    pub message: String,
}

/// Pipeline-wide error type.
///
/// Only [`AppError::Configuration`] aborts a stage. Every other variant is
/// scoped to the single file or URL named in it, and the batch carries on.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Retrieval ─────────────────────────────────────────────────────────────
    #[error("Transient I/O failure for {target}: {message}")]
    TransientIo { target: String, message: String },

    #[error("Remote rejected {target} with HTTP {status}")]
    RemoteRejected { target: String, status: u16 },

    // ── Input ─────────────────────────────────────────────────────────────────
    #[error("Corrupt input {}: {message}", path.display())]
    CorruptInput { path: PathBuf, message: String },

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Filesystem ────────────────────────────────────────────────────────────
    #[error("Filesystem error at {}: {message}", path.display())]
    Filesystem { path: PathBuf, message: String },

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Builds a `Filesystem` error from any displayable cause.
    pub fn fs(path: impl AsRef<Path>, cause: impl std::fmt::Display) -> Self {
        AppError::Filesystem {
            path: path.as_ref().to_path_buf(),
            message: cause.to_string(),
        }
    }

    /// Builds a `CorruptInput` error from any displayable cause.
    pub fn corrupt(path: impl AsRef<Path>, cause: impl std::fmt::Display) -> Self {
        AppError::CorruptInput {
            path: path.as_ref().to_path_buf(),
            message: cause.to_string(),
        }
    }

    /// Builds a `TransientIo` error for a remote target.
    pub fn transient(target: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        AppError::TransientIo {
            target: target.into(),
            message: cause.to_string(),
        }
    }

    /// Stable snake_case tag used in the failure log and in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::TransientIo { .. } => "transient_io",
            AppError::RemoteRejected { .. } => "remote_rejected",
            AppError::CorruptInput { .. } => "corrupt_input",
            AppError::Configuration(_) => "configuration",
            AppError::Filesystem { .. } => "filesystem",
            AppError::Internal(_) => "internal",
        }
    }

    /// True if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientIo { .. })
    }

    /// True if the error must abort the whole stage.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Configuration(_))
    }

    /// Converts the error into its failure-log form.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_record().serialize(serializer)
    }
}
