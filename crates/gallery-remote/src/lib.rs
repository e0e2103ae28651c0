//! Gallery remote crate - user-scoped, duplicate-tolerant upsert of image
//! records to the hosted backend.

pub mod auth;
pub mod backend;
pub mod client;
pub mod error;
pub mod http;

pub use auth::AuthSession;
pub use backend::{MemoryBackend, RemoteImageRow, UpsertBackend};
pub use client::{RemoteSyncClient, SyncResult};
pub use error::RemoteError;
pub use http::{HttpUpsertBackend, HttpUpsertConfig};
