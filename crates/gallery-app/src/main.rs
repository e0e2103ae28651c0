mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;

use gallery_api::auth::load_or_generate_token;
use gallery_api::{start_server, AppState};
use gallery_bridge::native::pump_inbound;
use gallery_bridge::{
    stage_sync_payload, BatchOutcome, Bridge, BridgeSettings, FileSessionStore,
    NativeMessagingChannel, StaticLocation, SyncListener, WindowBus,
};
use gallery_core::config::GalleryConfig;
use gallery_core::error::GalleryError;
use gallery_core::normalizer::{filter_gallery_images, normalize, NormalizeContext};
use gallery_remote::{AuthSession, HttpUpsertBackend, HttpUpsertConfig, RemoteSyncClient};
use gallery_storage::LocalStore;

use cli::{expand_home, CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

const DB_FILE: &str = "gallery.db";
const SESSION_FILE: &str = "session.json";
const TOKEN_FILE: &str = "api_token";
const EXTENSION_QUEUE: usize = 32;

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    // The configured log level is not known yet; report load problems
    // through a temporary stderr subscriber.
    let mut config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_writer(std::io::stderr).finish(),
        || GalleryConfig::load_or_default(&config_file),
    );
    config.general.port = args.resolve_port(config.general.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    init_tracing(&config.general.log_level);
    tracing::info!(
        config = %config_file.display(),
        "Starting gallery v{}",
        env!("CARGO_PKG_VERSION")
    );

    let data_dir = expand_home(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir).map_err(|e| {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        e
    })?;

    match args.command() {
        Command::Serve => serve(config, &data_dir).await,
        Command::Bridge => run_bridge(config, &data_dir).await,
        Command::Import { file, source } => import(&config, &data_dir, &file, source).await,
        Command::Export { file } => export(&data_dir, file).await,
        Command::Stage { file } => stage(&config, &data_dir, &file).await,
    }
}

/// Logs go to stderr; stdout carries native-messaging frames and exports.
fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

async fn open_store(data_dir: &Path) -> AppResult<Arc<LocalStore>> {
    let path = data_dir.join(DB_FILE);
    let store = Arc::new(LocalStore::open(&path));
    store.init().await?;
    tracing::info!(path = %path.display(), "Image store opened");
    Ok(store)
}

fn build_remote(config: &GalleryConfig) -> AppResult<Option<RemoteSyncClient>> {
    if !config.remote.enabled {
        return Ok(None);
    }
    let backend = HttpUpsertBackend::new(HttpUpsertConfig::from(&config.remote))?;
    let auth = AuthSession::from_user_id(config.auth.user_id.as_deref());
    if !auth.is_authenticated() {
        tracing::warn!("Remote sync enabled but no user_id configured; uploads will be skipped");
    }
    tracing::info!(endpoint = %backend.endpoint(), "Remote sync enabled");
    Ok(Some(RemoteSyncClient::new(auth, Arc::new(backend))))
}

async fn serve(config: GalleryConfig, data_dir: &Path) -> AppResult<()> {
    let store = open_store(data_dir).await?;
    let token = load_or_generate_token(&data_dir.join(TOKEN_FILE));
    let state = AppState::new(config, store, token);
    start_server(state).await?;
    Ok(())
}

/// Relay between the extension (stdin/stdout) and an in-process page.
async fn run_bridge(config: GalleryConfig, data_dir: &Path) -> AppResult<()> {
    let store = open_store(data_dir).await?;
    let remote = build_remote(&config)?;

    let bus = WindowBus::new();
    let location = Arc::new(StaticLocation::new(config.bridge.page_url.clone()));
    let session = Arc::new(FileSessionStore::new(data_dir.join(SESSION_FILE)));
    let (extension, writer) = NativeMessagingChannel::spawn(std::io::stdout());
    let (to_bridge, inbound) = mpsc::channel(EXTENSION_QUEUE);

    let mut listener = SyncListener::new(store, Arc::new(bus.clone()), location.clone())
        .with_ready_delay(Duration::from_millis(config.bridge.ready_delay_ms));
    if let Some(remote) = remote {
        listener = listener.with_remote(remote);
    }
    let bridge = Arc::new(Bridge::new(
        BridgeSettings::from(&config.bridge),
        Arc::new(bus.clone()),
        Arc::new(extension.clone()),
        session,
        location,
    ));

    // Both sides attach before either announces itself.
    let listener_rx = bus.subscribe();
    let bridge_rx = bus.subscribe();
    let listener = Arc::new(listener);
    let listener_task = tokio::spawn(listener.clone().run(listener_rx));
    let bridge_task = tokio::spawn(bridge.clone().run(bridge_rx, inbound));

    let pumped = pump_inbound(
        std::io::stdin(),
        config.bridge.max_frame_bytes,
        to_bridge,
        extension,
    )
    .await;

    if let Err(e) = bridge_task.await {
        tracing::warn!(error = %e, "Bridge task ended abnormally");
    }
    tracing::info!(stats = ?bridge.stats(), "Bridge stopped");
    drop(bridge);

    // Batches the bridge already relayed are persisted before exit.
    listener.shutdown();
    if let Err(e) = listener_task.await {
        tracing::warn!(error = %e, "Sync listener task ended abnormally");
    }
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "Native messaging writer task failed");
    }

    pumped?;
    Ok(())
}

async fn read_json_array(file: &Path) -> AppResult<Value> {
    let content = tokio::fs::read_to_string(file).await?;
    let raw: Value = serde_json::from_str(&content).map_err(GalleryError::from)?;
    if !raw.is_array() {
        return Err(GalleryError::Serialization(format!(
            "{} does not contain a JSON array",
            file.display()
        ))
        .into());
    }
    Ok(raw)
}

async fn import(
    config: &GalleryConfig,
    data_dir: &Path,
    file: &Path,
    source: Option<String>,
) -> AppResult<()> {
    let raw = read_json_array(file).await?;
    let store = open_store(data_dir).await?;
    let remote = build_remote(config)?;

    let ctx = NormalizeContext::new(source.unwrap_or_default());
    let received = raw.as_array().map(Vec::len).unwrap_or(0);
    let accepted = filter_gallery_images(normalize(&raw, &ctx));
    let stored = store.add_images(&accepted).await?;

    let remote = match remote {
        Some(client) if !accepted.is_empty() => Some(client.sync_images_to_gallery(&accepted).await),
        _ => None,
    };

    let outcome = BatchOutcome {
        received,
        accepted: accepted.len(),
        stored,
        remote,
    };
    tracing::info!(
        received = outcome.received,
        accepted = outcome.accepted,
        stored = outcome.stored,
        "Import finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn export(data_dir: &Path, file: Option<PathBuf>) -> AppResult<()> {
    let store = open_store(data_dir).await?;
    let json = store.export_to_json().await?;
    match file {
        Some(path) => {
            tokio::fs::write(&path, json).await?;
            tracing::info!(path = %path.display(), "Images exported");
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn stage(config: &GalleryConfig, data_dir: &Path, file: &Path) -> AppResult<()> {
    let raw = read_json_array(file).await?;
    let session = FileSessionStore::new(data_dir.join(SESSION_FILE));
    stage_sync_payload(&session, &config.bridge.staged_key, &raw)?;
    Ok(())
}
