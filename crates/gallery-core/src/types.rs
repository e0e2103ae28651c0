use serde::{Deserialize, Serialize};

/// Untyped image payload as it crosses the extension/page boundary.
///
/// Nothing inside a `RawImage` is trusted until it has gone through
/// [`crate::normalizer::normalize`].
pub type RawImage = serde_json::Value;

/// Platform label used when a payload does not name its generator.
pub const UNKNOWN_PLATFORM: &str = "unknown";

/// Media type used when a payload does not name one.
pub const DEFAULT_IMAGE_TYPE: &str = "image";

/// Canonical image record moved and stored throughout the pipeline.
///
/// Records are never mutated after normalization. The store hands out owned
/// copies, and replacing a record means deleting it and inserting a new one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
    /// Producer-assigned id, or `img_<timestamp>_<random>` when absent.
    pub id: String,
    /// Image location. Natural dedup key inside a batch and inside the store.
    pub url: String,
    /// Page the image was observed on.
    #[serde(rename = "sourceURL", alias = "tabUrl", alias = "sourceUrl", default)]
    pub source_url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(rename = "type", default = "default_image_type")]
    pub image_type: String,
    /// Epoch milliseconds, used for ordering.
    pub timestamp: i64,
}

impl GalleryImage {
    /// Whether the record carries a usable URL.
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

fn default_platform() -> String {
    UNKNOWN_PLATFORM.to_string()
}

fn default_image_type() -> String {
    DEFAULT_IMAGE_TYPE.to_string()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
