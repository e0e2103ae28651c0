//! Gallery bridge crate - cross-context relay between the extension
//! runtime and the gallery page, plus the page-side sync listener.
//!
//! Each context is modeled as an inbound event stream and an outbound sink:
//! the window channel is a broadcast bus seen by every attached script, and
//! the extension channel is either an in-process pair or native-messaging
//! frames over stdio.

pub mod bridge;
pub mod channel;
pub mod listener;
pub mod location;
pub mod native;
pub mod session;

pub use bridge::{
    translate, Bridge, BridgeInput, BridgeSettings, BridgeState, BridgeStats, BridgeStatsSnapshot,
    Effect,
};
pub use channel::{
    extension_pair, ExtensionChannel, ExtensionEnvelope, ExtensionPort, MpscExtensionChannel,
    WindowBus, WindowChannel, WindowEvent,
};
pub use listener::{filter_gallery_images, BatchOutcome, SyncListener};
pub use location::{PageLocation, StaticLocation};
pub use native::NativeMessagingChannel;
pub use session::{stage_sync_payload, FileSessionStore, MemorySessionStore, SessionStore};
