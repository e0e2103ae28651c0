//! Extension channel over browser native messaging.
//!
//! Framing and size limits come from `native_messaging`, whose host API is
//! blocking. Stdin is read on its own thread and stdout is written from a
//! blocking task; the bridge reaches both through channels. Logs must not
//! go to stdout while this channel owns it.

use std::io::{Read, Write};

use native_messaging::host::{self, NmError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gallery_core::error::{GalleryError, Result};

use crate::channel::{ExtensionChannel, ExtensionEnvelope};

/// Read one frame. Returns `Ok(None)` once the browser disconnects.
pub fn read_frame<R: Read>(reader: &mut R, max_bytes: usize) -> Result<Option<Value>> {
    match host::decode_message_opt(&mut *reader, max_bytes) {
        Ok(Some(text)) => Ok(Some(serde_json::from_str(&text)?)),
        Ok(None) | Err(NmError::Disconnected) => Ok(None),
        Err(e) => Err(GalleryError::Bridge(format!(
            "Native message read failed: {}",
            e
        ))),
    }
}

pub fn write_frame<W: Write>(writer: &mut W, message: &Value) -> Result<()> {
    host::send_json(&mut *writer, message)
        .map_err(|e| GalleryError::Bridge(format!("Native message write failed: {}", e)))?;
    writer.flush()?;
    Ok(())
}

#[derive(Debug)]
enum Outbound {
    /// Sent by the bridge on its own initiative.
    Notify(Value),
    /// Response to the inbound message being handled.
    Reply(Value),
    /// The inbound message being handled needs no response.
    NoReply,
}

/// Bridge-side sender that queues frames for a writer task.
#[derive(Debug, Clone)]
pub struct NativeMessagingChannel {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl NativeMessagingChannel {
    /// Spawn the writer that owns `writer` and return a sender for it.
    ///
    /// A browser that sends a one-off message takes the first frame it
    /// reads as the response. Until the first inbound message has been
    /// answered, or found to need no answer, notifications are held back.
    /// The writer ends once every sender is dropped, writing out anything
    /// still held.
    pub fn spawn<W>(mut writer: W) -> (Self, JoinHandle<()>)
    where
        W: Write + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let handle = tokio::task::spawn_blocking(move || {
            let mut answered = false;
            let mut held = Vec::new();
            while let Some(outbound) = rx.blocking_recv() {
                match outbound {
                    Outbound::Notify(message) if !answered => held.push(message),
                    Outbound::Notify(message) => write_logged(&mut writer, &message),
                    Outbound::Reply(message) => {
                        write_logged(&mut writer, &message);
                        answered = true;
                    }
                    Outbound::NoReply => answered = true,
                }
                if answered {
                    for message in held.drain(..) {
                        write_logged(&mut writer, &message);
                    }
                }
            }
            for message in held {
                write_logged(&mut writer, &message);
            }
            debug!("Native messaging writer stopped");
        });
        (Self { tx }, handle)
    }

    fn reply(&self, message: Value) -> Result<()> {
        self.enqueue(Outbound::Reply(message))
    }

    fn no_reply(&self) -> Result<()> {
        self.enqueue(Outbound::NoReply)
    }

    fn enqueue(&self, outbound: Outbound) -> Result<()> {
        self.tx.send(outbound).map_err(|_| GalleryError::ChannelClosed)
    }
}

impl ExtensionChannel for NativeMessagingChannel {
    fn send(&self, message: Value) -> Result<()> {
        self.enqueue(Outbound::Notify(message))
    }
}

fn write_logged<W: Write>(writer: &mut W, message: &Value) {
    if let Err(e) = write_frame(writer, message) {
        warn!(error = %e, "Dropping outbound native message");
    }
}

/// Read frames on a dedicated thread. Unparsable frame bodies are skipped;
/// any other read error is passed on and ends the thread.
fn spawn_reader<R>(mut reader: R, max_bytes: usize) -> mpsc::Receiver<Result<Value>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || loop {
        let frame = match read_frame(&mut reader, max_bytes) {
            Ok(Some(message)) => Ok(message),
            Ok(None) => return,
            Err(GalleryError::Serialization(e)) => {
                warn!(error = %e, "Skipping malformed native message");
                continue;
            }
            Err(e) => Err(e),
        };
        let stop = frame.is_err();
        if tx.blocking_send(frame).is_err() || stop {
            return;
        }
    });
    rx
}

/// Read frames from `reader` and hand them to the bridge.
///
/// A response produced by the bridge is written back on `replies`. Returns
/// when the stream ends or the bridge stops accepting messages; a framing
/// error ends the pump with that error, since the stream can no longer be
/// resynchronized.
pub async fn pump_inbound<R>(
    reader: R,
    max_bytes: usize,
    to_bridge: mpsc::Sender<ExtensionEnvelope>,
    replies: NativeMessagingChannel,
) -> Result<()>
where
    R: Read + Send + 'static,
{
    let mut frames = spawn_reader(reader, max_bytes);

    while let Some(frame) = frames.recv().await {
        let message = frame?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = ExtensionEnvelope {
            message,
            reply: Some(reply_tx),
        };
        if to_bridge.send(envelope).await.is_err() {
            debug!("Bridge stopped accepting extension messages");
            return Ok(());
        }

        let sent = match reply_rx.await {
            Ok(response) => replies.reply(response),
            Err(_) => replies.no_reply(),
        };
        if let Err(e) = sent {
            warn!(error = %e, "Failed to answer native message");
        }
    }

    debug!("Native messaging input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use gallery_core::messages::GALLERY_IMAGES;
    use serde_json::json;

    use crate::bridge::{Bridge, BridgeSettings};
    use crate::channel::WindowBus;
    use crate::location::StaticLocation;
    use crate::session::MemorySessionStore;

    const LIMIT: usize = 64 * 1024;

    /// Stdout stand-in that can be inspected after the writer stops.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn frames(&self) -> Vec<Value> {
            let mut cursor = Cursor::new(self.0.lock().unwrap().clone());
            let mut frames = Vec::new();
            while let Some(frame) = read_frame(&mut cursor, LIMIT).unwrap() {
                frames.push(frame);
            }
            frames
        }
    }

    fn encode_all(messages: &[Value]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for message in messages {
            write_frame(&mut bytes, message).unwrap();
        }
        bytes
    }

    #[test]
    fn test_frame_round_trip() {
        let bytes = encode_all(&[json!({"action": "galleryReady", "url": "http://x"})]);
        let mut cursor = Cursor::new(bytes);

        let message = read_frame(&mut cursor, LIMIT).unwrap().unwrap();
        assert_eq!(message["action"], "galleryReady");
        assert_eq!(read_frame(&mut cursor, LIMIT).unwrap(), None);
    }

    #[test]
    fn test_inbound_frame_over_limit() {
        let bytes = encode_all(&[json!({"images": "x".repeat(200)})]);
        assert!(read_frame(&mut Cursor::new(bytes), 64).is_err());
    }

    #[tokio::test]
    async fn test_pump_relays_and_answers() {
        let out = SharedBuf::default();
        let (replies, writer) = NativeMessagingChannel::spawn(out.clone());
        let (to_bridge, mut inbound) = mpsc::channel::<ExtensionEnvelope>(4);

        let responder = tokio::spawn(async move {
            let envelope = inbound.recv().await.unwrap();
            let count = envelope.message["images"].as_array().unwrap().len();
            envelope
                .reply
                .unwrap()
                .send(json!({"success": true, "count": count}))
                .unwrap();

            let ignored = inbound.recv().await.unwrap();
            drop(ignored);
        });

        let mut input = encode_all(&[json!({"action": GALLERY_IMAGES, "images": [1, 2]})]);
        // Malformed body is skipped without ending the pump.
        input.extend_from_slice(&3u32.to_le_bytes());
        input.extend_from_slice(b"{{{");
        input.extend(encode_all(&[json!({"action": "other"})]));

        pump_inbound(Cursor::new(input), LIMIT, to_bridge, replies)
            .await
            .unwrap();
        responder.await.unwrap();
        writer.await.unwrap();

        assert_eq!(out.frames(), vec![json!({"success": true, "count": 2})]);
    }

    #[tokio::test]
    async fn test_ack_is_first_frame_for_one_off_message() {
        let out = SharedBuf::default();
        let (extension, writer) = NativeMessagingChannel::spawn(out.clone());
        let (to_bridge, inbound) = mpsc::channel(4);
        let bus = WindowBus::new();
        let bridge = Arc::new(Bridge::new(
            BridgeSettings::default(),
            Arc::new(bus.clone()),
            Arc::new(extension.clone()),
            Arc::new(MemorySessionStore::new()),
            Arc::new(StaticLocation::new("http://localhost:3040/gallery")),
        ));
        let bridge_task = tokio::spawn(bridge.clone().run(bus.subscribe(), inbound));
        // Setup has announced the bridge before the request arrives.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let input = encode_all(&[json!({
            "action": GALLERY_IMAGES,
            "images": [{"id": "p1", "url": "http://a"}]
        })]);
        pump_inbound(Cursor::new(input), LIMIT, to_bridge, extension)
            .await
            .unwrap();
        bridge_task.await.unwrap();
        drop(bridge);
        writer.await.unwrap();

        let frames = out.frames();
        assert_eq!(frames[0], json!({"success": true, "count": 1}));
        assert_eq!(frames[1]["action"], "bridgeConnected");
        assert_eq!(frames.len(), 2);
    }
}
