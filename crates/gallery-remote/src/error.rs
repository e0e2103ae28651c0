use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the remote upsert endpoint.
///
/// These never escape [`crate::RemoteSyncClient`]; they are rendered into
/// the `errors` list of a [`crate::SyncResult`].
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote base url is missing")]
    BaseUrlMissing,
    #[error("remote request failed: {message}")]
    Request { message: String },
    #[error("remote response read failed: {message}")]
    Read { message: String },
    #[error("remote http {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("remote payload encode failed: {message}")]
    Encode { message: String },
}

/// Build an [`RemoteError::Http`] from a non-success response body.
pub fn format_http_error(status: StatusCode, body: &[u8]) -> RemoteError {
    let body = String::from_utf8_lossy(body).trim().to_string();
    let body = if body.is_empty() {
        "<empty>".to_string()
    } else {
        body
    };
    RemoteError::Http { status, body }
}
