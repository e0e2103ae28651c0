//! Duplex relay between the extension channel and the page window.
//!
//! [`translate`] decides what a message means and returns the effects to
//! perform. [`Bridge`] owns the channels and carries those effects out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use gallery_core::config::BridgeConfig;
use gallery_core::messages::{
    extension_kind, images_ack, message_type, ExtensionAction, WindowMessage, GALLERY_IMAGES,
    GALLERY_PAGE_READY, WEB_APP_TO_EXTENSION,
};
use gallery_core::types::now_millis;

use crate::channel::{ExtensionChannel, ExtensionEnvelope, WindowChannel, WindowEvent};
use crate::location::{host_and_path, strip_query_flag, PageLocation};
use crate::session::SessionStore;

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub sync_flag: String,
    pub staged_key: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            sync_flag: config.sync_flag.clone(),
            staged_key: config.staged_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Idle,
    Active,
    Unloaded,
}

/// Events the bridge reacts to.
#[derive(Debug, Clone, Copy)]
pub enum BridgeInput<'a> {
    Setup { now_ms: i64 },
    Extension(&'a Value),
    Window(&'a WindowEvent),
    /// Contents of the staged-sync key read during a drain.
    Staged(Option<&'a str>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PostWindow(Value),
    SendExtension(Value),
    /// Synchronous response to the extension message being handled.
    Respond(Value),
    ReplaceUrl(String),
    /// Read the staged key and feed it back as [`BridgeInput::Staged`].
    DrainStaged,
    ClearStaged,
    /// The staged payload was not valid JSON and is being discarded.
    StagedUnreadable(String),
}

/// Map one input to the effects it requires.
///
/// `href` is the page URL at the time the input is handled.
pub fn translate(input: BridgeInput<'_>, href: &str, settings: &BridgeSettings) -> Vec<Effect> {
    match input {
        BridgeInput::Setup { now_ms } => {
            let (host, path) = host_and_path(href);
            vec![
                Effect::PostWindow(WindowMessage::BridgeReady { timestamp: now_ms }.to_value()),
                Effect::SendExtension(ExtensionAction::BridgeConnected { host, path }.to_value()),
            ]
        }
        BridgeInput::Extension(message) => {
            if extension_kind(message) != Some(GALLERY_IMAGES) {
                return Vec::new();
            }
            match message.get("images").and_then(Value::as_array) {
                Some(items) => vec![
                    Effect::PostWindow(WindowMessage::batch(Value::Array(items.clone())).to_value()),
                    Effect::Respond(images_ack(items.len())),
                ],
                None => vec![Effect::Respond(images_ack(0))],
            }
        }
        BridgeInput::Window(event) => {
            if !event.same_window {
                return Vec::new();
            }
            match message_type(&event.data) {
                Some(WEB_APP_TO_EXTENSION) => vec![Effect::SendExtension(event.data.clone())],
                Some(GALLERY_PAGE_READY) => {
                    let mut effects = vec![Effect::SendExtension(
                        ExtensionAction::GalleryReady {
                            url: href.to_string(),
                        }
                        .to_value(),
                    )];
                    if let Some(stripped) = strip_query_flag(href, &settings.sync_flag) {
                        effects.push(Effect::ReplaceUrl(stripped));
                    }
                    effects.push(Effect::DrainStaged);
                    effects
                }
                _ => Vec::new(),
            }
        }
        BridgeInput::Staged(None) => Vec::new(),
        BridgeInput::Staged(Some(raw)) => {
            let mut effects = Vec::new();
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Array(items)) if !items.is_empty() => {
                    effects.push(Effect::PostWindow(
                        WindowMessage::batch(Value::Array(items)).to_value(),
                    ));
                }
                Ok(_) => {}
                Err(e) => effects.push(Effect::StagedUnreadable(e.to_string())),
            }
            effects.push(Effect::ClearStaged);
            effects
        }
    }
}

/// Relay counters.
#[derive(Debug, Default)]
pub struct BridgeStats {
    batches_forwarded: AtomicU64,
    images_forwarded: AtomicU64,
    extension_relayed: AtomicU64,
    staged_drains: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeStatsSnapshot {
    pub batches_forwarded: u64,
    pub images_forwarded: u64,
    pub extension_relayed: u64,
    pub staged_drains: u64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            batches_forwarded: self.batches_forwarded.load(Ordering::Relaxed),
            images_forwarded: self.images_forwarded.load(Ordering::Relaxed),
            extension_relayed: self.extension_relayed.load(Ordering::Relaxed),
            staged_drains: self.staged_drains.load(Ordering::Relaxed),
        }
    }
}

/// One bridge instance per page load.
pub struct Bridge {
    settings: BridgeSettings,
    state: Mutex<BridgeState>,
    stats: BridgeStats,
    window: Arc<dyn WindowChannel>,
    extension: Arc<dyn ExtensionChannel>,
    session: Arc<dyn SessionStore>,
    location: Arc<dyn PageLocation>,
}

impl Bridge {
    pub fn new(
        settings: BridgeSettings,
        window: Arc<dyn WindowChannel>,
        extension: Arc<dyn ExtensionChannel>,
        session: Arc<dyn SessionStore>,
        location: Arc<dyn PageLocation>,
    ) -> Self {
        Self {
            settings,
            state: Mutex::new(BridgeState::Idle),
            stats: BridgeStats::default(),
            window,
            extension,
            session,
            location,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(BridgeState::Unloaded)
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }

    fn set_state(&self, next: BridgeState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = next;
        }
    }

    /// Announce the bridge on both channels and become active.
    ///
    /// Listeners must already be attached. Has no effect unless idle.
    pub fn setup(&self) {
        if self.state() != BridgeState::Idle {
            return;
        }
        let href = self.location.href();
        self.apply(translate(
            BridgeInput::Setup { now_ms: now_millis() },
            &href,
            &self.settings,
        ));
        self.set_state(BridgeState::Active);
        info!(href = %href, "Bridge active");
    }

    /// Handle one extension-channel message and return the synchronous
    /// response, if the message calls for one.
    pub fn handle_extension_message(&self, message: &Value) -> Option<Value> {
        if self.state() != BridgeState::Active {
            debug!("Extension message ignored: bridge not active");
            return None;
        }
        let href = self.location.href();
        self.apply(translate(BridgeInput::Extension(message), &href, &self.settings))
    }

    pub fn handle_window_event(&self, event: &WindowEvent) {
        if self.state() != BridgeState::Active {
            return;
        }
        let href = self.location.href();
        self.apply(translate(BridgeInput::Window(event), &href, &self.settings));
    }

    /// Move to the terminal state. Later messages are ignored.
    pub fn unload(&self) {
        self.set_state(BridgeState::Unloaded);
        info!("Bridge unloaded");
    }

    fn apply(&self, effects: Vec<Effect>) -> Option<Value> {
        let mut response = None;
        for effect in effects {
            match effect {
                Effect::PostWindow(message) => {
                    if let Some(images) = message.get("images").and_then(Value::as_array) {
                        self.stats.batches_forwarded.fetch_add(1, Ordering::Relaxed);
                        self.stats
                            .images_forwarded
                            .fetch_add(images.len() as u64, Ordering::Relaxed);
                        debug!(count = images.len(), "Batch forwarded to page");
                    }
                    self.window.post(message);
                }
                Effect::SendExtension(message) => match self.extension.send(message) {
                    Ok(()) => {
                        self.stats.extension_relayed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(error = %e, "Failed to relay message to extension"),
                },
                Effect::Respond(value) => response = Some(value),
                Effect::ReplaceUrl(href) => {
                    debug!(href = %href, "Sync flag stripped from page URL");
                    self.location.replace(&href);
                }
                Effect::DrainStaged => {
                    let staged = match self.session.get(&self.settings.staged_key) {
                        Ok(staged) => staged,
                        Err(e) => {
                            warn!(error = %e, "Failed to read staged sync payload");
                            None
                        }
                    };
                    if staged.is_some() {
                        self.stats.staged_drains.fetch_add(1, Ordering::Relaxed);
                    }
                    let href = self.location.href();
                    self.apply(translate(
                        BridgeInput::Staged(staged.as_deref()),
                        &href,
                        &self.settings,
                    ));
                }
                Effect::StagedUnreadable(error) => {
                    warn!(error = %error, "Discarding unparsable staged sync payload");
                }
                Effect::ClearStaged => {
                    if let Err(e) = self.session.remove(&self.settings.staged_key) {
                        warn!(error = %e, "Failed to clear staged sync payload");
                    }
                }
            }
        }
        response
    }

    /// Attach to both channels and relay until either closes.
    ///
    /// `window_rx` must have been subscribed before this call so no message
    /// posted after setup is missed.
    pub async fn run(
        self: Arc<Self>,
        mut window_rx: broadcast::Receiver<WindowEvent>,
        mut extension_rx: mpsc::Receiver<ExtensionEnvelope>,
    ) {
        self.setup();

        loop {
            tokio::select! {
                envelope = extension_rx.recv() => {
                    let Some(envelope) = envelope else {
                        debug!("Extension channel closed");
                        break;
                    };
                    let response = self.handle_extension_message(&envelope.message);
                    if let (Some(reply), Some(response)) = (envelope.reply, response) {
                        let _ = reply.send(response);
                    }
                }
                event = window_rx.recv() => match event {
                    Ok(event) => self.handle_window_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bridge lagged behind window channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.unload();
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{extension_pair, ExtensionPort, WindowBus};
    use crate::location::StaticLocation;
    use crate::session::MemorySessionStore;
    use gallery_core::messages::{BRIDGE_SOURCE, EXTENSION_BRIDGE_READY};
    use serde_json::json;

    const PAGE: &str = "http://localhost:3040/gallery?sync=true";

    fn same(data: Value) -> WindowEvent {
        WindowEvent {
            same_window: true,
            data,
        }
    }

    // =========================================================================
    // translate
    // =========================================================================

    #[test]
    fn test_translate_setup() {
        let effects = translate(BridgeInput::Setup { now_ms: 7 }, PAGE, &BridgeSettings::default());
        assert_eq!(
            effects,
            vec![
                Effect::PostWindow(json!({"type": EXTENSION_BRIDGE_READY, "timestamp": 7})),
                Effect::SendExtension(json!({
                    "action": "bridgeConnected",
                    "host": "localhost:3040",
                    "path": "/gallery"
                })),
            ]
        );
    }

    #[test]
    fn test_translate_extension_batch() {
        let message = json!({"type": GALLERY_IMAGES, "images": [{"url": "a"}, {"url": "b"}]});
        let effects = translate(BridgeInput::Extension(&message), PAGE, &BridgeSettings::default());
        assert_eq!(
            effects,
            vec![
                Effect::PostWindow(json!({
                    "type": GALLERY_IMAGES,
                    "images": [{"url": "a"}, {"url": "b"}],
                    "source": BRIDGE_SOURCE
                })),
                Effect::Respond(json!({"success": true, "count": 2})),
            ]
        );
    }

    #[test]
    fn test_translate_extension_action_form_and_unknown() {
        let settings = BridgeSettings::default();
        let by_action = json!({"action": GALLERY_IMAGES, "images": []});
        assert_eq!(
            translate(BridgeInput::Extension(&by_action), PAGE, &settings).len(),
            2
        );

        let not_array = json!({"type": GALLERY_IMAGES, "images": "nope"});
        assert_eq!(
            translate(BridgeInput::Extension(&not_array), PAGE, &settings),
            vec![Effect::Respond(images_ack(0))]
        );

        let other = json!({"action": "somethingElse"});
        assert!(translate(BridgeInput::Extension(&other), PAGE, &settings).is_empty());
    }

    #[test]
    fn test_translate_rejects_foreign_window_messages() {
        let event = WindowEvent {
            same_window: false,
            data: json!({"type": WEB_APP_TO_EXTENSION, "payload": 1}),
        };
        assert!(translate(BridgeInput::Window(&event), PAGE, &BridgeSettings::default()).is_empty());
    }

    #[test]
    fn test_translate_forwards_web_app_message_verbatim() {
        let data = json!({"type": WEB_APP_TO_EXTENSION, "payload": {"nested": [1, 2]}});
        let effects = translate(
            BridgeInput::Window(&same(data.clone())),
            PAGE,
            &BridgeSettings::default(),
        );
        assert_eq!(effects, vec![Effect::SendExtension(data)]);
    }

    #[test]
    fn test_translate_page_ready() {
        let event = same(json!({"type": GALLERY_PAGE_READY, "url": PAGE}));
        let effects = translate(BridgeInput::Window(&event), PAGE, &BridgeSettings::default());
        assert_eq!(
            effects,
            vec![
                Effect::SendExtension(json!({"action": "galleryReady", "url": PAGE})),
                Effect::ReplaceUrl("http://localhost:3040/gallery".to_string()),
                Effect::DrainStaged,
            ]
        );

        let unflagged = translate(
            BridgeInput::Window(&event),
            "http://localhost:3040/gallery",
            &BridgeSettings::default(),
        );
        assert_eq!(unflagged.len(), 2);
        assert_eq!(unflagged[1], Effect::DrainStaged);
    }

    #[test]
    fn test_translate_staged_payloads() {
        let settings = BridgeSettings::default();
        assert!(translate(BridgeInput::Staged(None), PAGE, &settings).is_empty());

        let effects = translate(BridgeInput::Staged(Some("[{\"url\":\"a\"}]")), PAGE, &settings);
        assert_eq!(effects.len(), 2);
        assert!(matches!(&effects[0], Effect::PostWindow(v) if v["images"][0]["url"] == "a"));
        assert_eq!(effects[1], Effect::ClearStaged);

        for raw in ["[]", "{\"url\":\"a\"}"] {
            assert_eq!(
                translate(BridgeInput::Staged(Some(raw)), PAGE, &settings),
                vec![Effect::ClearStaged],
                "payload {raw}"
            );
        }

        let effects = translate(BridgeInput::Staged(Some("not json {")), PAGE, &settings);
        assert_eq!(effects.len(), 2);
        assert!(matches!(&effects[0], Effect::StagedUnreadable(e) if !e.is_empty()));
        assert_eq!(effects[1], Effect::ClearStaged);
    }

    // =========================================================================
    // Bridge
    // =========================================================================

    struct Harness {
        bridge: Bridge,
        bus: WindowBus,
        port: ExtensionPort,
        session: Arc<MemorySessionStore>,
        location: Arc<StaticLocation>,
    }

    fn harness(href: &str) -> Harness {
        let bus = WindowBus::new();
        let (port, channel, _inbound) = extension_pair(8);
        let session = Arc::new(MemorySessionStore::new());
        let location = Arc::new(StaticLocation::new(href));
        let bridge = Bridge::new(
            BridgeSettings::default(),
            Arc::new(bus.clone()),
            Arc::new(channel),
            session.clone(),
            location.clone(),
        );
        Harness {
            bridge,
            bus,
            port,
            session,
            location,
        }
    }

    #[tokio::test]
    async fn test_setup_announces_once() {
        let mut h = harness(PAGE);
        let mut page = h.bus.subscribe();

        assert_eq!(h.bridge.state(), BridgeState::Idle);
        h.bridge.setup();
        h.bridge.setup();
        assert_eq!(h.bridge.state(), BridgeState::Active);

        let ready = page.recv().await.unwrap();
        assert_eq!(ready.data["type"], EXTENSION_BRIDGE_READY);
        assert!(page.try_recv().is_err());

        assert_eq!(h.port.recv().await.unwrap()["action"], "bridgeConnected");
        assert!(h.port.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_messages_ignored_unless_active() {
        let h = harness(PAGE);
        let mut page = h.bus.subscribe();
        let message = json!({"type": GALLERY_IMAGES, "images": [{"url": "a"}]});

        assert_eq!(h.bridge.handle_extension_message(&message), None);

        h.bridge.setup();
        h.bridge.unload();
        assert_eq!(h.bridge.handle_extension_message(&message), None);

        assert_eq!(page.recv().await.unwrap().data["type"], EXTENSION_BRIDGE_READY);
        assert!(page.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ready_precedes_batches() {
        let h = harness(PAGE);
        let mut page = h.bus.subscribe();
        h.bridge.setup();

        let ack = h
            .bridge
            .handle_extension_message(&json!({"type": GALLERY_IMAGES, "images": [{"url": "a"}]}));
        assert_eq!(ack, Some(json!({"success": true, "count": 1})));

        assert_eq!(page.recv().await.unwrap().data["type"], EXTENSION_BRIDGE_READY);
        let batch = page.recv().await.unwrap();
        assert_eq!(batch.data["type"], GALLERY_IMAGES);
        assert_eq!(batch.data["source"], BRIDGE_SOURCE);
        assert_eq!(h.bridge.stats().batches_forwarded, 1);
        assert_eq!(h.bridge.stats().images_forwarded, 1);
    }

    #[tokio::test]
    async fn test_page_ready_drains_staged_once() {
        let mut h = harness(PAGE);
        h.session
            .set("gallery_sync_data", "[{\"url\":\"http://a\"}]")
            .unwrap();
        h.bridge.setup();
        let _ = h.port.recv().await;

        let mut page = h.bus.subscribe();
        let ready = same(json!({"type": GALLERY_PAGE_READY, "url": PAGE}));
        h.bridge.handle_window_event(&ready);
        h.bridge.handle_window_event(&ready);

        let batch = page.recv().await.unwrap();
        assert_eq!(batch.data["images"][0]["url"], "http://a");
        assert!(page.try_recv().is_err());
        assert_eq!(h.session.get("gallery_sync_data").unwrap(), None);
        assert_eq!(h.bridge.stats().staged_drains, 1);

        assert_eq!(h.location.href(), "http://localhost:3040/gallery");
        let notified = h.port.recv().await.unwrap();
        assert_eq!(notified["action"], "galleryReady");
        assert_eq!(notified["url"], PAGE);
    }

    #[tokio::test]
    async fn test_corrupt_staged_payload_is_cleared() {
        let h = harness(PAGE);
        h.session.set("gallery_sync_data", "{{{").unwrap();
        h.bridge.setup();

        let mut page = h.bus.subscribe();
        h.bridge
            .handle_window_event(&same(json!({"type": GALLERY_PAGE_READY})));

        assert!(page.try_recv().is_err());
        assert_eq!(h.session.get("gallery_sync_data").unwrap(), None);
    }

    #[tokio::test]
    async fn test_relay_failure_is_not_fatal() {
        let h = harness(PAGE);
        drop(h.port);
        h.bridge.setup();
        assert_eq!(h.bridge.state(), BridgeState::Active);
        h.bridge.handle_window_event(&same(json!({"type": WEB_APP_TO_EXTENSION})));
        assert_eq!(h.bridge.stats().extension_relayed, 0);
    }

    #[tokio::test]
    async fn test_run_answers_extension_with_ack() {
        let bus = WindowBus::new();
        let (mut port, channel, inbound) = extension_pair(8);
        let bridge = Arc::new(Bridge::new(
            BridgeSettings::default(),
            Arc::new(bus.clone()),
            Arc::new(channel),
            Arc::new(MemorySessionStore::new()),
            Arc::new(StaticLocation::new(PAGE)),
        ));
        let mut page = bus.subscribe();
        let task = tokio::spawn(bridge.clone().run(bus.subscribe(), inbound));

        assert_eq!(port.recv().await.unwrap()["action"], "bridgeConnected");
        let ack = port
            .send_message(json!({"action": GALLERY_IMAGES, "images": [{"url": "a"}, {"url": "b"}]}))
            .await
            .unwrap();
        assert_eq!(ack, Some(json!({"success": true, "count": 2})));

        let ignored = port.send_message(json!({"action": "other"})).await.unwrap();
        assert_eq!(ignored, None);

        assert_eq!(page.recv().await.unwrap().data["type"], EXTENSION_BRIDGE_READY);
        assert_eq!(page.recv().await.unwrap().data["type"], GALLERY_IMAGES);

        drop(port);
        task.await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Unloaded);
    }
}
