//! Error types for stackprobe.
//!
//! Only configuration-class failures surface as errors. Filesystem
//! trouble encountered while evaluating signals is folded into "signal
//! absent" by the evaluators and never reaches this type.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for detection operations.
#[derive(Error, Debug)]
pub enum DetectorError {
    // Catalog errors
    #[error("Catalog file not found: {0}")]
    CatalogNotFound(PathBuf),

    #[error("Failed to read catalog {path}: {source}")]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog JSON parse error: {0}")]
    CatalogParse(#[from] serde_json::Error),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    // Invocation errors
    #[error(
        "Invalid target '{target}': valid targets are {}",
        valid.join(", ")
    )]
    InvalidTarget { target: String, valid: Vec<String> },

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Result type alias using DetectorError
pub type Result<T> = std::result::Result<T, DetectorError>;

impl DetectorError {
    /// Create an invalid catalog error
    pub fn invalid_catalog(msg: impl Into<String>) -> Self {
        Self::InvalidCatalog(msg.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    /// Create an invalid target error listing every valid key
    pub fn invalid_target(
        target: impl Into<String>,
        valid: Vec<String>,
    ) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            valid,
        }
    }
}
