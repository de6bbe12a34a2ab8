//! Durable store of pins and their photo records.
//!
//! Mutations are serialized through a single connection, commit before they
//! return, and are announced on a broadcast channel so a display layer can
//! update incrementally instead of reloading. Deleting a photo - directly or
//! through its pin - always evicts the photo's image-cache entry, whether or
//! not bytes were ever downloaded.

pub mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::cache::ContentCache;
use crate::flickr::PhotoDescriptor;

/// A dropped location marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
  pub id: i64,
  pub latitude: f64,
  pub longitude: f64,
  /// Total result pages the search API reported for this location; 0 until
  /// the first successful search.
  pub total_pages: u32,
  pub created_at: DateTime<Utc>,
}

/// One photo record owned by a pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
  pub id: i64,
  pub pin_id: i64,
  /// Medium-size image URL; empty means "no image available".
  pub image_url: String,
  /// Cache identifier derived from the URL; empty iff the URL is empty.
  pub image_path: String,
}

/// Change notifications emitted after each committed mutation.
#[derive(Debug, Clone)]
pub enum StoreEvent {
  PinCreated(Pin),
  PinUpdated(Pin),
  PinDeleted(i64),
  PhotoCreated(Photo),
  PhotoDeleted(i64),
}

/// Derive the cache identifier for an image URL: its last `/`-separated
/// segment. Deterministic, and empty for an empty URL.
pub fn image_path_for_url(image_url: &str) -> String {
  if image_url.is_empty() {
    return String::new();
  }
  image_url.rsplit('/').next().unwrap_or_default().to_string()
}

const EVENT_CAPACITY: usize = 256;

/// SQLite-backed store of pins and photos.
///
/// Clones share one connection and one event channel.
#[derive(Clone)]
pub struct PhotoStore {
  conn: Arc<Mutex<Connection>>,
  cache: ContentCache,
  events: broadcast::Sender<StoreEvent>,
}

impl PhotoStore {
  /// Open or create the store at the given path. The cache handle is used
  /// to evict image bytes when photo records are deleted.
  pub fn open(path: &Path, cache: ContentCache) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::from_connection(conn, cache)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory(cache: ContentCache) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::from_connection(conn, cache)
  }

  fn from_connection(conn: Connection, cache: ContentCache) -> Result<Self> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      cache,
      events,
    })
  }

  /// Subscribe to change notifications. Events are emitted after the
  /// mutation has committed.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
    self.events.subscribe()
  }

  /// The image cache this store evicts from.
  pub fn cache(&self) -> &ContentCache {
    &self.cache
  }

  fn emit(&self, event: StoreEvent) {
    // No receivers is fine; nobody has to be listening.
    let _ = self.events.send(event);
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  // ==========================================================================
  // Pins
  // ==========================================================================

  pub fn create_pin(&self, latitude: f64, longitude: f64) -> Result<Pin> {
    validate_coordinate(latitude, longitude)?;

    let id = {
      let conn = self.lock()?;
      conn
        .execute(
          "INSERT INTO pins (latitude, longitude) VALUES (?, ?)",
          params![latitude, longitude],
        )
        .map_err(|e| eyre!("Failed to create pin: {}", e))?;
      conn.last_insert_rowid()
    };

    let pin = self.get_pin(id)?;
    self.emit(StoreEvent::PinCreated(pin.clone()));
    Ok(pin)
  }

  /// Update a pin's coordinate (the marker being dragged).
  pub fn move_pin(&self, id: i64, latitude: f64, longitude: f64) -> Result<Pin> {
    validate_coordinate(latitude, longitude)?;

    {
      let conn = self.lock()?;
      let updated = conn
        .execute(
          "UPDATE pins SET latitude = ?, longitude = ? WHERE id = ?",
          params![latitude, longitude, id],
        )
        .map_err(|e| eyre!("Failed to move pin {}: {}", id, e))?;
      if updated == 0 {
        return Err(eyre!("No pin with id {}", id));
      }
    }

    let pin = self.get_pin(id)?;
    self.emit(StoreEvent::PinUpdated(pin.clone()));
    Ok(pin)
  }

  /// Delete a pin and every photo it owns. Each owned photo's cache entry is
  /// evicted before the rows are removed, all within one transaction.
  pub fn delete_pin(&self, id: i64) -> Result<()> {
    let photos = {
      let mut conn = self.lock()?;
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      let photos = photos_for_pin(&tx, id)?;
      for photo in &photos {
        self.cache.delete(&photo.image_path);
      }

      tx.execute("DELETE FROM photos WHERE pin_id = ?", params![id])
        .map_err(|e| eyre!("Failed to delete photos for pin {}: {}", id, e))?;
      let deleted = tx
        .execute("DELETE FROM pins WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to delete pin {}: {}", id, e))?;
      if deleted == 0 {
        return Err(eyre!("No pin with id {}", id));
      }

      tx.commit()
        .map_err(|e| eyre!("Failed to commit pin delete: {}", e))?;
      photos
    };

    for photo in &photos {
      self.emit(StoreEvent::PhotoDeleted(photo.id));
    }
    self.emit(StoreEvent::PinDeleted(id));
    Ok(())
  }

  pub fn get_pin(&self, id: i64) -> Result<Pin> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT id, latitude, longitude, total_pages, created_at FROM pins WHERE id = ?",
        params![id],
        pin_from_row,
      )
      .map_err(|e| eyre!("Failed to load pin {}: {}", id, e))
  }

  pub fn list_pins(&self) -> Result<Vec<Pin>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, latitude, longitude, total_pages, created_at FROM pins ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare pin query: {}", e))?;

    let pins = stmt
      .query_map([], pin_from_row)
      .map_err(|e| eyre!("Failed to query pins: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pin row: {}", e))?;

    Ok(pins)
  }

  /// Persist the total page count reported by the last search for this pin.
  pub fn set_total_pages(&self, pin_id: i64, total_pages: u32) -> Result<()> {
    {
      let conn = self.lock()?;
      let updated = conn
        .execute(
          "UPDATE pins SET total_pages = ? WHERE id = ?",
          params![total_pages, pin_id],
        )
        .map_err(|e| eyre!("Failed to update total pages for pin {}: {}", pin_id, e))?;
      if updated == 0 {
        return Err(eyre!("No pin with id {}", pin_id));
      }
    }

    let pin = self.get_pin(pin_id)?;
    self.emit(StoreEvent::PinUpdated(pin));
    Ok(())
  }

  // ==========================================================================
  // Photos
  // ==========================================================================

  /// Create one photo record per descriptor, owned by `pin_id`.
  ///
  /// Descriptors without a usable image URL still get a record (with empty
  /// URL and path) so the display layer can render a placeholder instead of
  /// silently dropping the slot.
  pub fn create_photos(&self, pin_id: i64, descriptors: &[PhotoDescriptor]) -> Result<Vec<Photo>> {
    let photos = {
      let mut conn = self.lock()?;
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      // Creating photos for a missing pin must fail, not insert orphans.
      let pin_exists: bool = tx
        .query_row("SELECT COUNT(*) FROM pins WHERE id = ?", params![pin_id], |row| {
          row.get::<_, i64>(0).map(|n| n > 0)
        })
        .map_err(|e| eyre!("Failed to check pin {}: {}", pin_id, e))?;
      if !pin_exists {
        return Err(eyre!("No pin with id {}", pin_id));
      }

      let mut photos = Vec::with_capacity(descriptors.len());
      for descriptor in descriptors {
        let image_url = descriptor.url_m.clone();
        let image_path = image_path_for_url(&image_url);
        tx.execute(
          "INSERT INTO photos (pin_id, image_url, image_path) VALUES (?, ?, ?)",
          params![pin_id, image_url, image_path],
        )
        .map_err(|e| eyre!("Failed to create photo: {}", e))?;
        photos.push(Photo {
          id: tx.last_insert_rowid(),
          pin_id,
          image_url,
          image_path,
        });
      }

      tx.commit()
        .map_err(|e| eyre!("Failed to commit photo creation: {}", e))?;
      photos
    };

    for photo in &photos {
      self.emit(StoreEvent::PhotoCreated(photo.clone()));
    }
    Ok(photos)
  }

  /// Delete one photo record and evict its cache entry.
  pub fn delete_photo(&self, id: i64) -> Result<()> {
    let photo = self.get_photo(id)?;

    self.cache.delete(&photo.image_path);
    {
      let conn = self.lock()?;
      conn
        .execute("DELETE FROM photos WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to delete photo {}: {}", id, e))?;
    }

    self.emit(StoreEvent::PhotoDeleted(id));
    Ok(())
  }

  pub fn get_photo(&self, id: i64) -> Result<Photo> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT id, pin_id, image_url, image_path FROM photos WHERE id = ?",
        params![id],
        photo_from_row,
      )
      .map_err(|e| eyre!("Failed to load photo {}: {}", id, e))
  }

  /// All photos owned by a pin. Order carries no meaning.
  pub fn list_photos(&self, pin_id: i64) -> Result<Vec<Photo>> {
    let conn = self.lock()?;
    photos_for_pin(&conn, pin_id)
  }
}

fn validate_coordinate(latitude: f64, longitude: f64) -> Result<()> {
  if !(-90.0..=90.0).contains(&latitude) {
    return Err(eyre!("Latitude {} out of range [-90, 90]", latitude));
  }
  if !(-180.0..=180.0).contains(&longitude) {
    return Err(eyre!("Longitude {} out of range [-180, 180]", longitude));
  }
  Ok(())
}

fn pin_from_row(row: &Row<'_>) -> rusqlite::Result<Pin> {
  let created_at: String = row.get(4)?;
  Ok(Pin {
    id: row.get(0)?,
    latitude: row.get(1)?,
    longitude: row.get(2)?,
    total_pages: row.get(3)?,
    created_at: parse_datetime(&created_at).map_err(|e| {
      rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?,
  })
}

/// Parse a datetime string from SQLite format ("YYYY-MM-DD HH:MM:SS").
fn parse_datetime(s: &str) -> chrono::ParseResult<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
  Ok(Photo {
    id: row.get(0)?,
    pin_id: row.get(1)?,
    image_url: row.get(2)?,
    image_path: row.get(3)?,
  })
}

fn photos_for_pin(conn: &Connection, pin_id: i64) -> Result<Vec<Photo>> {
  let mut stmt = conn
    .prepare("SELECT id, pin_id, image_url, image_path FROM photos WHERE pin_id = ?")
    .map_err(|e| eyre!("Failed to prepare photo query: {}", e))?;

  let photos = stmt
    .query_map(params![pin_id], photo_from_row)
    .map_err(|e| eyre!("Failed to query photos: {}", e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read photo row: {}", e))?;

  Ok(photos)
}
