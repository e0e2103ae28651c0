use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gallery_core::types::GalleryImage;

use crate::error::RemoteError;

/// Row shape written to the remote `gallery_images` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteImageRow {
    pub user_id: String,
    pub image_id: String,
    pub url: String,
    pub source_url: String,
    pub prompt: String,
    pub platform: String,
    pub creation_date: String,
    pub image_type: String,
    pub timestamp: i64,
}

impl RemoteImageRow {
    pub fn from_image(image: &GalleryImage, user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            image_id: image.id.clone(),
            url: image.url.clone(),
            source_url: image.source_url.clone(),
            prompt: image.prompt.clone(),
            platform: image.platform.clone(),
            creation_date: image.creation_date.clone(),
            image_type: image.image_type.clone(),
            timestamp: image.timestamp,
        }
    }
}

/// One duplicate-tolerant bulk write keyed on `url`.
///
/// Rows whose `url` already exists remotely must be left untouched.
#[async_trait]
pub trait UpsertBackend: Send + Sync {
    async fn upsert(&self, rows: &[RemoteImageRow]) -> Result<(), RemoteError>;
}

/// In-process backend with insert-if-absent semantics.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: Mutex<Vec<RemoteImageRow>>,
    calls: AtomicUsize,
    fail_with: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upsert fail with a request error.
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut guard) = self.fail_with.lock() {
            *guard = Some(message.into());
        }
    }

    pub fn rows(&self) -> Vec<RemoteImageRow> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    /// Number of upsert calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpsertBackend for MemoryBackend {
    async fn upsert(&self, rows: &[RemoteImageRow]) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.fail_with.lock().ok().and_then(|g| g.clone()) {
            return Err(RemoteError::Request { message });
        }

        let mut stored = self.rows.lock().map_err(|e| RemoteError::Request {
            message: e.to_string(),
        })?;
        for row in rows {
            if !stored.iter().any(|existing| existing.url == row.url) {
                stored.push(row.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(url: &str, prompt: &str) -> RemoteImageRow {
        RemoteImageRow {
            user_id: "u".to_string(),
            image_id: url.to_string(),
            url: url.to_string(),
            source_url: String::new(),
            prompt: prompt.to_string(),
            platform: "unknown".to_string(),
            creation_date: String::new(),
            image_type: "image".to_string(),
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn test_memory_backend_ignores_duplicates() {
        let backend = MemoryBackend::new();
        backend.upsert(&[row("http://a", "first")]).await.unwrap();
        backend
            .upsert(&[row("http://a", "second"), row("http://b", "b")])
            .await
            .unwrap();

        let rows = backend.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].prompt, "first");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_memory_backend_failure() {
        let backend = MemoryBackend::new();
        backend.fail_with("offline");
        let err = backend.upsert(&[row("http://a", "")]).await.unwrap_err();
        assert!(matches!(err, RemoteError::Request { .. }));
        assert!(backend.rows().is_empty());
    }

    #[test]
    fn test_row_serializes_snake_case() {
        let image = GalleryImage {
            id: "img_1".to_string(),
            url: "http://a".to_string(),
            source_url: "http://src".to_string(),
            prompt: "p".to_string(),
            platform: "dalle".to_string(),
            creation_date: "2026-01-01".to_string(),
            image_type: "image".to_string(),
            timestamp: 7,
        };
        let value = serde_json::to_value(RemoteImageRow::from_image(&image, "user-9")).unwrap();
        assert_eq!(value["user_id"], "user-9");
        assert_eq!(value["image_id"], "img_1");
        assert_eq!(value["source_url"], "http://src");
        assert_eq!(value["creation_date"], "2026-01-01");
    }
}
