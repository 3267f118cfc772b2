//! Pipeline error taxonomy
//!
//! Row-level parse problems are not represented here: malformed CSV rows are
//! skipped inline (counted and logged) and never abort an import. Everything
//! below unwinds to the orchestrator, which records the failure in the
//! version registry before re-raising.

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Upstream directory listing failed.
    #[error("Catalogue unavailable: {0}")]
    CatalogueUnavailable(String),

    /// The directory index parsed cleanly but listed nothing usable.
    #[error("No releases found at {0}")]
    NoReleasesFound(String),

    /// A download still failing after all retry attempts.
    #[error("Download failed for {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    /// Corrupt archive or I/O error while unzipping.
    #[error("Extraction failed for {archive}: {reason}")]
    ExtractionFailed { archive: String, reason: String },

    /// A COPY batch was rejected by the database; aborts the current file.
    #[error("COPY into {target} failed: {source}")]
    CopyFailed {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// A phase is marked done but its staging data is gone.
    #[error("Checkpoint corruption: {0}")]
    CheckpointCorruption(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] cnpj_common::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Internal(format!("worker task failed: {err}"))
    }
}
