//! Codec error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or writing machine bundles.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a machine bundle: {}", .0.display())]
    NotABundle(PathBuf),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("core error: {0}")]
    Core(#[from] machines_core::CoreError),
}
