//! User-scoped sync of accepted image batches to the remote store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gallery_core::types::GalleryImage;

use crate::auth::AuthSession;
use crate::backend::{RemoteImageRow, UpsertBackend};

pub const NOT_AUTHENTICATED: &str = "Not authenticated";
pub const NO_IMAGES: &str = "No images to sync";

/// Outcome of one remote sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl SyncResult {
    pub fn ok(count: usize) -> Self {
        Self {
            success: true,
            count,
            errors: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            count: 0,
            errors: Some(vec![message.into()]),
        }
    }
}

/// Wraps the upsert backend with auth and empty-input fast paths.
///
/// Never returns an error: every failure becomes a `SyncResult` with
/// `success: false`.
#[derive(Clone)]
pub struct RemoteSyncClient {
    auth: AuthSession,
    backend: Arc<dyn UpsertBackend>,
}

impl RemoteSyncClient {
    pub fn new(auth: AuthSession, backend: Arc<dyn UpsertBackend>) -> Self {
        Self { auth, backend }
    }

    pub async fn sync_images_to_gallery(&self, images: &[GalleryImage]) -> SyncResult {
        let Some(user_id) = self.auth.user_id() else {
            warn!("Remote sync skipped: not authenticated");
            return SyncResult::failed(NOT_AUTHENTICATED);
        };
        if images.is_empty() {
            return SyncResult::failed(NO_IMAGES);
        }

        let rows: Vec<RemoteImageRow> = images
            .iter()
            .map(|image| RemoteImageRow::from_image(image, &user_id))
            .collect();

        match self.backend.upsert(&rows).await {
            Ok(()) => {
                info!(count = rows.len(), "Images synced to remote gallery");
                SyncResult::ok(rows.len())
            }
            Err(e) => {
                warn!(error = %e, "Remote sync failed");
                SyncResult::failed(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for RemoteSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncClient")
            .field("authenticated", &self.auth.is_authenticated())
            .finish()
    }
}
