//! Bearer-token auth for the local API.
//!
//! The token lives in `<data_dir>/api_token` and is created on first start.

use std::path::Path;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::Rng;
use tracing::{info, warn};

use crate::error::ErrorBody;
use crate::state::AppState;

/// Random 32-character hex token.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Read the token at `token_path`, or create and persist a new one.
///
/// A token that cannot be persisted is still returned so the server can
/// start; clients then need it from the log.
pub fn load_or_generate_token(token_path: &Path) -> String {
    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim();
        if !token.is_empty() {
            info!("API token loaded from {}", token_path.display());
            return token.to_string();
        }
    }

    let token = generate_token();
    if let Some(parent) = token_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::write(token_path, &token) {
        Ok(()) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ =
                    std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600));
            }
            info!("API token saved to {}", token_path.display());
        }
        Err(e) => {
            warn!(error = %e, "Failed to save API token to {}", token_path.display());
        }
    }
    token
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "unauthorized".to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Reject requests without `Authorization: Bearer <api_token>`.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return unauthorized("Missing Authorization header");
    };
    let Ok(value) = value.to_str() else {
        return unauthorized("Invalid Authorization header encoding");
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if !state.api_token.is_empty() && token == state.api_token => {
            next.run(req).await
        }
        _ => unauthorized("Invalid bearer token"),
    }
}
