//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use gallery_core::error::GalleryError;

use crate::handlers;
use crate::state::AppState;

const BODY_LIMIT: usize = 1024 * 1024;
const IMPORT_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Create the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Localhost only, on the configured port.
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let public_routes = Router::new().route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route(
            "/images",
            get(handlers::list_images).delete(handlers::clear_images),
        )
        .route(
            "/images/{id}",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        .route("/export", get(handlers::export_images))
        .route(
            "/import",
            post(handlers::import_images).layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT)),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `127.0.0.1:<general.port>` until the server stops.
pub async fn start_server(state: AppState) -> Result<(), GalleryError> {
    let addr = format!("127.0.0.1:{}", state.config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GalleryError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| GalleryError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
