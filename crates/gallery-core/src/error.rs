use thiserror::Error;

/// Top-level error type for the gallery sync pipeline.
///
/// Only storage failures are meant to propagate past a component boundary.
/// Transport failures are logged and surfaced as results by the components
/// that own the transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GalleryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<toml::de::Error> for GalleryError {
    fn from(err: toml::de::Error) -> Self {
        GalleryError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for GalleryError {
    fn from(err: toml::ser::Error) -> Self {
        GalleryError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GalleryError {
    fn from(err: serde_json::Error) -> Self {
        GalleryError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for gallery operations.
pub type Result<T> = std::result::Result<T, GalleryError>;
