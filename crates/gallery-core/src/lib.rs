pub mod config;
pub mod error;
pub mod messages;
pub mod normalizer;
pub mod types;

pub use config::GalleryConfig;
pub use error::{GalleryError, Result};
pub use normalizer::{filter_gallery_images, normalize, NormalizeContext};
pub use types::*;
