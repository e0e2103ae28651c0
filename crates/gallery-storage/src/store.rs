//! Durable, deduplicated local store of gallery images.
//!
//! The store keeps exactly one record per URL. That invariant is enforced by
//! the existence check inside [`LocalStore::add_images`], which scans every
//! stored URL before writing. There is no unique constraint on `url` at the
//! SQL layer, so nothing may insert rows except through `add_images`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use gallery_core::error::{GalleryError, Result};
use gallery_core::normalizer::{filter_gallery_images, normalize, NormalizeContext};
use gallery_core::types::GalleryImage;

use crate::db::Database;

const SELECT_COLUMNS: &str =
    "SELECT id, url, source_url, prompt, platform, creation_date, image_type, timestamp FROM images";

#[derive(Debug, Clone)]
enum Backing {
    File(PathBuf),
    Memory,
}

/// Counts reported by a bulk import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Elements in the incoming array.
    pub received: usize,
    /// Records left after normalization and URL filtering.
    pub accepted: usize,
    /// Records newly written to the store.
    pub stored: usize,
}

/// Local image store backed by SQLite.
///
/// Constructed explicitly and shared by `Arc`. The database is opened lazily
/// on the first [`init`](Self::init) or operation; concurrent first callers
/// converge on the same handle.
#[derive(Debug)]
pub struct LocalStore {
    backing: Backing,
    db: OnceCell<Arc<Database>>,
}

impl LocalStore {
    /// Store backed by a database file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            backing: Backing::File(path.into()),
            db: OnceCell::new(),
        }
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory,
            db: OnceCell::new(),
        }
    }

    /// Open the database and apply the schema. Idempotent.
    pub async fn init(&self) -> Result<()> {
        self.handle().await.map(|_| ())
    }

    async fn handle(&self) -> Result<&Arc<Database>> {
        self.db
            .get_or_try_init(|| async {
                let db = match &self.backing {
                    Backing::File(path) => Database::new(path)?,
                    Backing::Memory => Database::in_memory()?,
                };
                info!("Local image store initialized");
                Ok::<_, GalleryError>(Arc::new(db))
            })
            .await
    }

    /// Write every record whose URL (and id) is not already stored.
    ///
    /// The existence check and the inserts run in one transaction. Returns
    /// the number of records written; zero means the write was skipped.
    pub async fn add_images(&self, images: &[GalleryImage]) -> Result<usize> {
        let db = self.handle().await?;
        db.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(storage_err)?;
            let (mut urls, mut ids) = existing_keys(&tx)?;

            let mut fresh = Vec::new();
            for image in images {
                if urls.contains(&image.url) || ids.contains(&image.id) {
                    continue;
                }
                urls.insert(image.url.clone());
                ids.insert(image.id.clone());
                fresh.push(image);
            }

            if fresh.is_empty() {
                debug!(offered = images.len(), "No new images to store");
                return Ok(0);
            }

            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO images (id, url, source_url, prompt, platform, creation_date, image_type, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )
                    .map_err(storage_err)?;
                for image in &fresh {
                    stmt.execute(params![
                        image.id,
                        image.url,
                        image.source_url,
                        image.prompt,
                        image.platform,
                        image.creation_date,
                        image.image_type,
                        image.timestamp,
                    ])
                    .map_err(|e| GalleryError::Storage(format!("Failed to save image: {}", e)))?;
                }
            }

            tx.commit().map_err(storage_err)?;
            info!(
                offered = images.len(),
                stored = fresh.len(),
                "Images saved to local store"
            );
            Ok(fresh.len())
        })
    }

    /// All stored images, newest first.
    pub async fn get_all_images(&self) -> Result<Vec<GalleryImage>> {
        let db = self.handle().await?;
        db.with_conn(|conn| {
            query_images(
                conn,
                &format!("{} ORDER BY timestamp DESC", SELECT_COLUMNS),
                [],
            )
        })
    }

    /// Images from one platform, newest first.
    pub async fn get_images_by_platform(&self, platform: &str) -> Result<Vec<GalleryImage>> {
        let db = self.handle().await?;
        db.with_conn(|conn| {
            query_images(
                conn,
                &format!(
                    "{} WHERE platform = ?1 ORDER BY timestamp DESC",
                    SELECT_COLUMNS
                ),
                params![platform],
            )
        })
    }

    pub async fn get_image(&self, id: &str) -> Result<Option<GalleryImage>> {
        let db = self.handle().await?;
        db.with_conn(|conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_image,
            )
            .optional()
            .map_err(storage_err)
        })
    }

    pub async fn count(&self) -> Result<u64> {
        let db = self.handle().await?;
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }

    /// Delete one image. Returns whether a record was removed.
    pub async fn delete_image(&self, id: &str) -> Result<bool> {
        let db = self.handle().await?;
        db.with_conn(|conn| {
            let removed = conn
                .execute("DELETE FROM images WHERE id = ?1", params![id])
                .map_err(|e| GalleryError::Storage(format!("Failed to delete image: {}", e)))?;
            Ok(removed > 0)
        })
    }

    /// Delete every image. Returns the number removed.
    pub async fn clear_images(&self) -> Result<usize> {
        let db = self.handle().await?;
        db.with_conn(|conn| {
            let removed = conn
                .execute("DELETE FROM images", [])
                .map_err(|e| GalleryError::Storage(format!("Failed to clear images: {}", e)))?;
            info!(removed, "Local store cleared");
            Ok(removed)
        })
    }

    /// Serialize the full record set as a pretty-printed JSON array.
    pub async fn export_to_json(&self) -> Result<String> {
        let images = self.get_all_images().await?;
        Ok(serde_json::to_string_pretty(&images)?)
    }

    /// Bulk import a JSON array of raw payloads.
    ///
    /// Payloads go through normalization and URL filtering before
    /// [`add_images`](Self::add_images). Input that is not JSON at all is an
    /// error; a JSON value that is not an array imports nothing.
    pub async fn import_from_json(
        &self,
        json: &str,
        ctx: &NormalizeContext,
    ) -> Result<ImportSummary> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        let received = raw.as_array().map(Vec::len).unwrap_or(0);
        let accepted = filter_gallery_images(normalize(&raw, ctx));
        let stored = self.add_images(&accepted).await?;
        Ok(ImportSummary {
            received,
            accepted: accepted.len(),
            stored,
        })
    }
}

fn storage_err(e: rusqlite::Error) -> GalleryError {
    GalleryError::Storage(e.to_string())
}

fn existing_keys(conn: &Connection) -> Result<(HashSet<String>, HashSet<String>)> {
    let mut stmt = conn
        .prepare("SELECT id, url FROM images")
        .map_err(storage_err)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(storage_err)?;

    let mut ids = HashSet::new();
    let mut urls = HashSet::new();
    for row in rows {
        let (id, url) = row.map_err(storage_err)?;
        ids.insert(id);
        urls.insert(url);
    }
    Ok((urls, ids))
}

fn query_images<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<GalleryImage>> {
    let mut stmt = conn.prepare(sql).map_err(storage_err)?;
    let rows = stmt.query_map(params, row_to_image).map_err(storage_err)?;

    let mut images = Vec::new();
    for row in rows {
        images.push(row.map_err(storage_err)?);
    }
    Ok(images)
}

fn row_to_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<GalleryImage> {
    Ok(GalleryImage {
        id: row.get(0)?,
        url: row.get(1)?,
        source_url: row.get(2)?,
        prompt: row.get(3)?,
        platform: row.get(4)?,
        creation_date: row.get(5)?,
        image_type: row.get(6)?,
        timestamp: row.get(7)?,
    })
}
