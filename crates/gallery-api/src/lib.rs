//! Gallery API crate - local HTTP surface over the image store.
//!
//! Lets the gallery UI and scripts read back, export, bulk import and
//! delete stored images.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
