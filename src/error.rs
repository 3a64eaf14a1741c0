//! Request-level error taxonomy.
//!
//! Each stage keeps its own error type; [`RequestError`] is what the
//! orchestrator hands back, and [`RequestError::status`] is the only place
//! that decides which HTTP status a failure becomes.

use crate::cache::StoreError;
use crate::imaging::TransformError;
use crate::source::FetchError;
use std::path::PathBuf;
use thiserror::Error;

/// A request that can never succeed as written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRequest {
    #[error("no width or height requested")]
    MissingDimensions,
    #[error("value `{value}` for `{key}` is out of range")]
    OutOfRange { key: char, value: String },
    #[error("operations `{0}` do not match any preset")]
    PresetMismatch(String),
    #[error("{width}x{height} exceeds the {max}px upscale limit")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("source path `{0}` is not allowed")]
    ForbiddenPath(String),
    #[error("source URI `{0}` is malformed")]
    MalformedUri(String),
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    Invalid(#[from] InvalidRequest),
    #[error("Source image not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("Source unavailable: {0}")]
    Fetch(#[from] FetchError),
    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RequestError {
    /// HTTP status code for this failure.
    pub fn status(&self) -> u16 {
        match self {
            RequestError::Invalid(_) | RequestError::SourceNotFound(_) => 404,
            RequestError::Fetch(_) => 502,
            RequestError::Transform(_)
            | RequestError::Store(_)
            | RequestError::Unreadable { .. } => 500,
        }
    }

    /// Whether the failure is the caller's, not the server's.
    pub fn is_client_error(&self) -> bool {
        self.status() < 500
    }
}
