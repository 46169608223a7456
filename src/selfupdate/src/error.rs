//! Error types for selfupdate.

use std::path::PathBuf;
use thiserror::Error;

use crate::updater::UpdatePhase;

/// Result type for update operations.
pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Errors that can occur during update operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Fetching manifest {url} returned HTTP {status}")]
    ManifestFetch { url: String, status: u16 },

    #[error("Failed to parse manifest {url}: {source}")]
    ManifestParse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Downloading {url} returned HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // Version errors
    #[error("Version ({version}) is not a valid semantic version string")]
    InvalidVersion { version: String },

    // Verification errors
    #[error("No artifact found for platform {platform}")]
    NoArtifactForPlatform { platform: String },

    #[error("SHA256 mismatch for {filename}: expected {expected}, got {actual}")]
    HashMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("Signature verification failed for {filename}")]
    SignatureInvalid { filename: String },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    #[error("Signing failed: {message}")]
    Signing { message: String },

    // Archive errors
    #[error("Unsupported archive format: {filename}")]
    UnsupportedArchiveFormat { filename: String },

    #[error("No file inside archive")]
    EmptyArchive,

    #[error("{name} is not a regular file")]
    NotARegularFile { name: String },

    #[error("Archive must contain exactly 1 file, found {count}")]
    UnexpectedFileCount { count: usize },

    #[error("Failed to extract archive: {message}")]
    ExtractionFailed { message: String },

    // Installation errors
    #[error("Failed to move update to {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),

    // Config errors
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    // File system errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error annotated with the update step that produced it.
    #[error("{step}: {source}")]
    Step {
        step: UpdatePhase,
        #[source]
        source: Box<UpdateError>,
    },
}

impl UpdateError {
    /// Annotate this error with the step it happened in.
    ///
    /// Already annotated errors keep their original step.
    pub fn at(self, step: UpdatePhase) -> Self {
        match self {
            Self::Step { .. } => self,
            other => Self::Step {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with any step annotation removed.
    pub fn root(&self) -> &UpdateError {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// The step this error was annotated with, if any.
    pub fn step(&self) -> Option<UpdatePhase> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Check if this error is a network error.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self.root(),
            Self::Network(_) | Self::ManifestFetch { .. } | Self::DownloadFailed { .. }
        )
    }

    /// Check if this error means the artifact could not be trusted.
    pub fn is_verification_error(&self) -> bool {
        matches!(
            self.root(),
            Self::HashMismatch { .. } | Self::SignatureInvalid { .. }
        )
    }
}
