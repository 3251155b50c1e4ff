//! Error types for tile rendering.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from tile persistence and rendering.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("output directory {}: {}", .path.display(), .source)]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type alias for rendering operations.
pub type Result<T> = std::result::Result<T, RenderError>;
