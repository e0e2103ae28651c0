//! Wire vocabulary for the two message channels.
//!
//! Window-channel messages are JSON objects discriminated by `type`.
//! Extension-channel messages from the bridge are discriminated by `action`,
//! except the raw `GALLERY_IMAGES` action pushed by the privileged runtime,
//! which may use either field.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EXTENSION_BRIDGE_READY: &str = "EXTENSION_BRIDGE_READY";
pub const GALLERY_PAGE_READY: &str = "GALLERY_PAGE_READY";
pub const GALLERY_IMAGES: &str = "GALLERY_IMAGES";
pub const GALLERY_IMAGES_RECEIVED: &str = "GALLERY_IMAGES_RECEIVED";
pub const WEB_APP_TO_EXTENSION: &str = "WEB_APP_TO_EXTENSION";

/// `source` tag attached to batches relayed by the bridge.
pub const BRIDGE_SOURCE: &str = "extension_bridge";

/// The `type` discriminator of a window message, if it has one.
pub fn message_type(message: &Value) -> Option<&str> {
    message.get("type").and_then(Value::as_str)
}

/// The discriminator of an extension-channel message: `type`, else `action`.
pub fn extension_kind(message: &Value) -> Option<&str> {
    message
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| message.get("action").and_then(Value::as_str))
}

/// Messages the bridge and the page post on the window channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WindowMessage {
    #[serde(rename = "EXTENSION_BRIDGE_READY")]
    BridgeReady { timestamp: i64 },
    #[serde(rename = "GALLERY_PAGE_READY")]
    PageReady { url: String },
    #[serde(rename = "GALLERY_IMAGES")]
    GalleryImages { images: Value, source: String },
    #[serde(rename = "GALLERY_IMAGES_RECEIVED")]
    ImagesReceived { count: usize, timestamp: i64 },
}

impl WindowMessage {
    /// A relayed batch, tagged with the bridge source.
    pub fn batch(images: Value) -> Self {
        WindowMessage::GalleryImages {
            images,
            source: BRIDGE_SOURCE.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Notifications the bridge sends to the privileged runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ExtensionAction {
    BridgeConnected { host: String, path: String },
    GalleryReady { url: String },
}

impl ExtensionAction {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Synchronous acknowledgement for a `GALLERY_IMAGES` extension message.
pub fn images_ack(count: usize) -> Value {
    json!({ "success": true, "count": count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_message_wire_shape() {
        let ready = WindowMessage::BridgeReady { timestamp: 9 }.to_value();
        assert_eq!(ready, json!({"type": "EXTENSION_BRIDGE_READY", "timestamp": 9}));

        let batch = WindowMessage::batch(json!([{"url": "a"}])).to_value();
        assert_eq!(batch["type"], GALLERY_IMAGES);
        assert_eq!(batch["source"], BRIDGE_SOURCE);
        assert_eq!(batch["images"][0]["url"], "a");

        let ack = WindowMessage::ImagesReceived {
            count: 2,
            timestamp: 1,
        }
        .to_value();
        assert_eq!(ack["type"], GALLERY_IMAGES_RECEIVED);
        assert_eq!(ack["count"], 2);
    }

    #[test]
    fn test_extension_action_wire_shape() {
        let connected = ExtensionAction::BridgeConnected {
            host: "localhost:3040".to_string(),
            path: "/gallery".to_string(),
        }
        .to_value();
        assert_eq!(
            connected,
            json!({"action": "bridgeConnected", "host": "localhost:3040", "path": "/gallery"})
        );

        let ready = ExtensionAction::GalleryReady {
            url: "http://x".to_string(),
        }
        .to_value();
        assert_eq!(ready["action"], "galleryReady");
    }

    #[test]
    fn test_discriminators() {
        assert_eq!(message_type(&json!({"type": "X"})), Some("X"));
        assert_eq!(message_type(&json!({"type": 3})), None);
        assert_eq!(message_type(&json!([1])), None);
        assert_eq!(
            extension_kind(&json!({"action": GALLERY_IMAGES})),
            Some(GALLERY_IMAGES)
        );
        assert_eq!(extension_kind(&json!({"type": "A", "action": "B"})), Some("A"));
    }

    #[test]
    fn test_images_ack() {
        assert_eq!(images_ack(3), json!({"success": true, "count": 3}));
    }
}
