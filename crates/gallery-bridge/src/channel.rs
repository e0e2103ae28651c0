//! Window and extension message channels.

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use gallery_core::error::{GalleryError, Result};

const WINDOW_BUS_CAPACITY: usize = 256;

/// A message observed on the page's window channel.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEvent {
    /// Whether the sender is the page's own window. Messages from other
    /// frames or origins carry `false` and must be ignored by the bridge.
    pub same_window: bool,
    pub data: Value,
}

/// Outbound half of the window channel.
pub trait WindowChannel: Send + Sync {
    /// Post a message to the page's own window. Delivery is fire-and-forget.
    fn post(&self, message: Value);
}

/// In-process window channel. Every subscriber sees every posted message,
/// including its own.
#[derive(Debug, Clone)]
pub struct WindowBus {
    tx: broadcast::Sender<WindowEvent>,
}

impl WindowBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(WINDOW_BUS_CAPACITY);
        Self { tx }
    }

    /// Attach a listener. Only messages posted after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<WindowEvent> {
        self.tx.subscribe()
    }

    /// Deliver a message as if posted by another frame or origin.
    pub fn post_foreign(&self, message: Value) {
        self.send(WindowEvent {
            same_window: false,
            data: message,
        });
    }

    fn send(&self, event: WindowEvent) {
        if self.tx.send(event).is_err() {
            debug!("Window message posted with no listeners attached");
        }
    }
}

impl Default for WindowBus {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowChannel for WindowBus {
    fn post(&self, message: Value) {
        self.send(WindowEvent {
            same_window: true,
            data: message,
        });
    }
}

/// A message arriving from the privileged runtime, with an optional
/// response slot for synchronous replies.
#[derive(Debug)]
pub struct ExtensionEnvelope {
    pub message: Value,
    pub reply: Option<oneshot::Sender<Value>>,
}

/// Outbound half of the extension channel.
///
/// `send` only enqueues, so it is safe to call from inside a message
/// handler. An error means the channel is gone; callers log and move on.
pub trait ExtensionChannel: Send + Sync {
    fn send(&self, message: Value) -> Result<()>;
}

/// Bridge-side sender of an in-process extension channel.
#[derive(Debug, Clone)]
pub struct MpscExtensionChannel {
    tx: mpsc::UnboundedSender<Value>,
}

impl ExtensionChannel for MpscExtensionChannel {
    fn send(&self, message: Value) -> Result<()> {
        self.tx.send(message).map_err(|_| GalleryError::ChannelClosed)
    }
}

/// Runtime-side end of an in-process extension channel.
#[derive(Debug)]
pub struct ExtensionPort {
    to_bridge: mpsc::Sender<ExtensionEnvelope>,
    from_bridge: mpsc::UnboundedReceiver<Value>,
}

impl ExtensionPort {
    /// Send a message to the bridge and wait for its response, if any.
    ///
    /// Returns `Ok(None)` when the bridge handled the message without
    /// responding.
    pub async fn send_message(&self, message: Value) -> Result<Option<Value>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.to_bridge
            .send(ExtensionEnvelope {
                message,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| GalleryError::ChannelClosed)?;
        Ok(reply_rx.await.ok())
    }

    /// Next message the bridge sent to the runtime.
    pub async fn recv(&mut self) -> Option<Value> {
        self.from_bridge.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.from_bridge.try_recv().ok()
    }
}

/// Create an in-process extension channel.
///
/// Returns the runtime-side port, the bridge's outbound sender and the
/// bridge's inbound receiver.
pub fn extension_pair(
    buffer: usize,
) -> (
    ExtensionPort,
    MpscExtensionChannel,
    mpsc::Receiver<ExtensionEnvelope>,
) {
    let (to_bridge, inbound) = mpsc::channel(buffer.max(1));
    let (outbound, from_bridge) = mpsc::unbounded_channel();
    (
        ExtensionPort {
            to_bridge,
            from_bridge,
        },
        MpscExtensionChannel { tx: outbound },
        inbound,
    )
}
