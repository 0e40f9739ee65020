//! Error types shared across the crate

use thiserror::Error;

/// Result type for terrastream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while creating loaders or resolving content
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP status {status} for {url}")]
    Http { status: u16, url: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glTF: {0}")]
    InvalidGltf(String),

    #[error("Invalid tileset: {0}")]
    InvalidTileset(String),

    #[error("Invalid layer.json: {0}")]
    InvalidLayer(String),

    #[error("Unsupported asset type: {0}")]
    UnsupportedAssetType(String),

    #[error("Loader creation failed: {0}")]
    LoaderCreation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
