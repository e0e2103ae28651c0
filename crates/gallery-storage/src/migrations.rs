//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use gallery_core::error::GalleryError;

/// Run all pending migrations. Safe to call on every open.
pub fn run_migrations(conn: &Connection) -> Result<(), GalleryError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| GalleryError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| GalleryError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: gallery_images");
    }

    Ok(())
}

/// Version 1: image table keyed by id with non-unique lookup indexes.
///
/// `url` uniqueness is enforced by `LocalStore::add_images`, not here.
fn apply_v1(conn: &Connection) -> Result<(), GalleryError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS images (
            id              TEXT PRIMARY KEY NOT NULL,
            url             TEXT NOT NULL,
            source_url      TEXT NOT NULL DEFAULT '',
            prompt          TEXT NOT NULL DEFAULT '',
            platform        TEXT NOT NULL DEFAULT 'unknown',
            creation_date   TEXT NOT NULL DEFAULT '',
            image_type      TEXT NOT NULL DEFAULT 'image',
            timestamp       INTEGER NOT NULL,
            stored_at       INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_images_url
            ON images (url);

        CREATE INDEX IF NOT EXISTS idx_images_platform
            ON images (platform, timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_images_timestamp
            ON images (timestamp DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'gallery_images');
        ",
    )
    .map_err(|e| GalleryError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
