//! Page-side consumer of relayed image batches.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use gallery_core::config::BridgeConfig;
use gallery_core::error::Result;
use gallery_core::messages::{message_type, WindowMessage, EXTENSION_BRIDGE_READY, GALLERY_IMAGES};
use gallery_core::normalizer::{normalize, NormalizeContext};
use gallery_core::types::now_millis;
use gallery_remote::{RemoteSyncClient, SyncResult};
use gallery_storage::LocalStore;

use crate::channel::{WindowChannel, WindowEvent};
use crate::location::PageLocation;

pub use gallery_core::normalizer::filter_gallery_images;

/// What happened to one delivered batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub received: usize,
    pub accepted: usize,
    pub stored: usize,
    /// `None` when no remote client is attached or nothing was accepted.
    pub remote: Option<SyncResult>,
}

pub struct SyncListener {
    store: Arc<LocalStore>,
    remote: Option<RemoteSyncClient>,
    window: Arc<dyn WindowChannel>,
    location: Arc<dyn PageLocation>,
    ready_delay: Duration,
    shutdown: Arc<Notify>,
}

impl SyncListener {
    pub fn new(
        store: Arc<LocalStore>,
        window: Arc<dyn WindowChannel>,
        location: Arc<dyn PageLocation>,
    ) -> Self {
        Self {
            store,
            remote: None,
            window,
            location,
            ready_delay: Duration::from_millis(BridgeConfig::default().ready_delay_ms),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_remote(mut self, remote: RemoteSyncClient) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Delay before the unprompted readiness announcement in [`run`](Self::run).
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// Post `GALLERY_PAGE_READY` with the current page URL.
    pub fn announce_ready(&self) {
        let url = self.location.href();
        debug!(url = %url, "Announcing page ready");
        self.window.post(WindowMessage::PageReady { url }.to_value());
    }

    /// Normalize, filter and persist one batch.
    ///
    /// Local and remote persistence run independently. A remote failure is
    /// reported in the outcome; a local storage failure is returned as the
    /// error after the remote attempt has finished.
    pub async fn on_gallery_images(&self, images: &Value) -> Result<BatchOutcome> {
        let received = images.as_array().map(Vec::len).unwrap_or(0);
        let ctx = NormalizeContext::new(self.location.href());
        let accepted = filter_gallery_images(normalize(images, &ctx));

        if accepted.is_empty() {
            debug!(received, "Batch contained no usable images");
            return Ok(BatchOutcome {
                received,
                accepted: 0,
                stored: 0,
                remote: None,
            });
        }

        let local = self.store.add_images(&accepted);
        let remote = async {
            match &self.remote {
                Some(client) => Some(client.sync_images_to_gallery(&accepted).await),
                None => None,
            }
        };
        let (local, remote) = tokio::join!(local, remote);

        self.window.post(
            WindowMessage::ImagesReceived {
                count: accepted.len(),
                timestamp: now_millis(),
            }
            .to_value(),
        );

        if let Some(result) = remote.as_ref().filter(|r| !r.success) {
            warn!(errors = ?result.errors, "Remote sync did not complete");
        }

        let stored = local?;
        info!(
            received,
            accepted = accepted.len(),
            stored,
            "Gallery images received"
        );
        Ok(BatchOutcome {
            received,
            accepted: accepted.len(),
            stored,
            remote,
        })
    }

    /// React to one window message. Returns the batch outcome when the
    /// message was an image batch.
    pub async fn handle_window_event(&self, event: &WindowEvent) -> Result<Option<BatchOutcome>> {
        if !event.same_window {
            return Ok(None);
        }
        match message_type(&event.data) {
            Some(EXTENSION_BRIDGE_READY) => {
                self.announce_ready();
                Ok(None)
            }
            Some(GALLERY_IMAGES) => match event.data.get("images") {
                Some(images) if images.is_array() => self.on_gallery_images(images).await.map(Some),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Consume window messages until the channel closes or
    /// [`shutdown`](Self::shutdown) is called.
    ///
    /// Announces readiness once, unprompted, after the configured delay, in
    /// case the bridge attached first. On shutdown, messages already queued
    /// on `window_rx` are still handled before returning.
    pub async fn run(self: Arc<Self>, mut window_rx: broadcast::Receiver<WindowEvent>) {
        let announcer = {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(this.ready_delay).await;
                this.announce_ready();
            })
        };

        loop {
            tokio::select! {
                biased;
                event = window_rx.recv() => match event {
                    Ok(event) => self.handle_logged(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Listener lagged behind window channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = self.shutdown.notified() => {
                    self.drain(&mut window_rx).await;
                    break;
                }
            }
        }

        announcer.abort();
        debug!("Sync listener stopped");
    }

    /// Ask [`run`](Self::run) to finish. Safe to call before `run` starts.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn drain(&self, window_rx: &mut broadcast::Receiver<WindowEvent>) {
        loop {
            match window_rx.try_recv() {
                Ok(event) => self.handle_logged(&event).await,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Listener lagged behind window channel");
                }
                Err(_) => return,
            }
        }
    }

    async fn handle_logged(&self, event: &WindowEvent) {
        if let Err(e) = self.handle_window_event(event).await {
            error!(error = %e, "Failed to persist gallery images");
        }
    }
}

impl std::fmt::Debug for SyncListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncListener")
            .field("remote", &self.remote.is_some())
            .field("ready_delay", &self.ready_delay)
            .finish()
    }
}
