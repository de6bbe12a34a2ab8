//! Per-pin album orchestration: search, persist, materialize.
//!
//! Ties the pieces together: the search client finds photo metadata near a
//! pin, the store keeps the records, and image bytes are materialized on
//! demand through the cache. One album fetch may be in flight per pin at a
//! time; nothing retries on its own.

use color_eyre::{eyre::eyre, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::flickr::{ImageFetcher, SearchClient};
use crate::store::{Photo, PhotoStore, Pin};

/// The state of a pin's album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumState {
  /// No photos and no fetch attempted yet.
  Empty,
  /// Initial fetch in flight.
  Loading,
  /// Photos are present (possibly zero after a search with no results).
  Loaded,
  /// Existing photos discarded, replacement fetch in flight.
  Refreshing,
  /// The last fetch failed; stays here until the caller retries.
  Failed(String),
}

impl AlbumState {
  /// Whether a fetch is in flight, i.e. "request new collection" should be
  /// disabled.
  pub fn is_busy(&self) -> bool {
    matches!(self, AlbumState::Loading | AlbumState::Refreshing)
  }
}

/// Result of materializing a photo's image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageBytes {
  /// The photo has no image URL; render a placeholder.
  NoImage,
  Bytes(Vec<u8>),
}

/// Orchestrates album loading and image materialization for pins.
#[derive(Clone)]
pub struct AlbumController {
  client: SearchClient,
  fetcher: ImageFetcher,
  store: PhotoStore,
  cache: ContentCache,
  states: Arc<Mutex<HashMap<i64, AlbumState>>>,
}

impl AlbumController {
  pub fn new(
    client: SearchClient,
    fetcher: ImageFetcher,
    store: PhotoStore,
    cache: ContentCache,
  ) -> Self {
    Self {
      client,
      fetcher,
      store,
      cache,
      states: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Current state of a pin's album.
  pub fn album_state(&self, pin_id: i64) -> AlbumState {
    self
      .states
      .lock()
      .ok()
      .and_then(|states| states.get(&pin_id).cloned())
      .unwrap_or(AlbumState::Empty)
  }

  /// Whether an album fetch is in flight for this pin.
  pub fn is_busy(&self, pin_id: i64) -> bool {
    self.album_state(pin_id).is_busy()
  }

  /// Load a pin's album, fetching from the search API only when the album
  /// is empty. Returns the album's photos.
  pub async fn load_album(&self, pin_id: i64) -> Result<Vec<Photo>> {
    let pin = self.store.get_pin(pin_id)?;

    let existing = self.store.list_photos(pin_id)?;
    if !existing.is_empty() {
      self.set_state(pin_id, AlbumState::Loaded);
      return Ok(existing);
    }

    self.begin(pin_id, AlbumState::Loading)?;
    match self.fetch_page(&pin, None).await {
      Ok(photos) => {
        self.set_state(pin_id, AlbumState::Loaded);
        Ok(photos)
      }
      Err(e) => {
        self.set_state(pin_id, AlbumState::Failed(e.to_string()));
        Err(e)
      }
    }
  }

  /// Discard a pin's photos and fetch a fresh collection from a random page
  /// within the last known total, so repeated refreshes surface different
  /// results.
  pub async fn refresh_album(&self, pin_id: i64) -> Result<Vec<Photo>> {
    let pin = self.store.get_pin(pin_id)?;

    self.begin(pin_id, AlbumState::Refreshing)?;
    match self.refresh_inner(&pin).await {
      Ok(photos) => {
        self.set_state(pin_id, AlbumState::Loaded);
        Ok(photos)
      }
      Err(e) => {
        self.set_state(pin_id, AlbumState::Failed(e.to_string()));
        Err(e)
      }
    }
  }

  async fn refresh_inner(&self, pin: &Pin) -> Result<Vec<Photo>> {
    for photo in self.store.list_photos(pin.id)? {
      self.store.delete_photo(photo.id)?;
    }

    let page = random_page(pin.total_pages);
    debug!("refreshing pin {} from page {}", pin.id, page);
    self.fetch_page(pin, Some(page)).await
  }

  /// Search around the pin, persist the resulting records and the reported
  /// page count. The store is only touched after a successful search, so a
  /// failure leaves no partial album behind.
  async fn fetch_page(&self, pin: &Pin, page: Option<u32>) -> Result<Vec<Photo>> {
    let result = match self.client.search(pin.latitude, pin.longitude, page).await {
      Ok(result) => result,
      Err(e) => {
        warn!("search failed for pin {}: {}", pin.id, e);
        // Into, not eyre!: callers match on the FetchError kind by downcast.
        return Err(e.into());
      }
    };

    self.store.set_total_pages(pin.id, result.pages)?;
    let photos = self.store.create_photos(pin.id, &result.photos)?;
    info!(
      "loaded {} photos for pin {} ({} pages available)",
      photos.len(),
      pin.id,
      result.pages
    );
    Ok(photos)
  }

  /// Materialize a photo's image bytes, read-through: cached bytes are
  /// returned without a network call; a miss downloads, caches, then
  /// returns. Photos without an image URL yield `NoImage` untouched.
  pub async fn materialize_image(&self, photo_id: i64) -> Result<ImageBytes> {
    let photo = self.store.get_photo(photo_id)?;

    if photo.image_url.is_empty() {
      return Ok(ImageBytes::NoImage);
    }

    if let Some(bytes) = self.cache.get(&photo.image_path) {
      return Ok(ImageBytes::Bytes(bytes));
    }

    let bytes = self.fetcher.fetch(&photo.image_url).join().await?;
    self.cache.put(&photo.image_path, Some(&bytes));
    Ok(ImageBytes::Bytes(bytes))
  }

  /// Materialize every photo in a pin's album, downloads running
  /// concurrently. Fails on the first photo that can't be materialized.
  pub async fn materialize_album(&self, pin_id: i64) -> Result<Vec<(Photo, ImageBytes)>> {
    let photos = self.store.list_photos(pin_id)?;

    let results =
      futures::future::join_all(photos.iter().map(|photo| self.materialize_image(photo.id)))
        .await;

    photos
      .into_iter()
      .zip(results)
      .map(|(photo, result)| result.map(|bytes| (photo, bytes)))
      .collect()
  }

  /// Mark a fetch as started, rejecting overlapping fetches for one pin.
  fn begin(&self, pin_id: i64, state: AlbumState) -> Result<()> {
    let mut states = self
      .states
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if states.get(&pin_id).is_some_and(AlbumState::is_busy) {
      return Err(eyre!("Album fetch already in flight for pin {}", pin_id));
    }

    states.insert(pin_id, state);
    Ok(())
  }

  fn set_state(&self, pin_id: i64, state: AlbumState) {
    if let Ok(mut states) = self.states.lock() {
      states.insert(pin_id, state);
    }
  }
}

/// Pick the page for a refresh: uniform within `[1, total_pages]`, page 1
/// when no total is known yet.
fn random_page(total_pages: u32) -> u32 {
  if total_pages == 0 {
    return 1;
  }
  rand::rng().random_range(1..=total_pages)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FetchError;
  use crate::flickr::testserver;

  const SEARCH_BODY: &str = r#"{"photos":{"pages":3,"photo":[
    {"id":"1","url_m":"http://x/a.jpg"},
    {"id":"2","url_m":""}
  ]},"stat":"ok"}"#;

  struct Fixture {
    _dir: tempfile::TempDir,
    cache: ContentCache,
    store: PhotoStore,
  }

  fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let cache = ContentCache::open(dir.path().join("images")).unwrap();
    let store = PhotoStore::open_in_memory(cache.clone()).unwrap();
    Fixture {
      _dir: dir,
      cache,
      store,
    }
  }

  fn controller(fx: &Fixture, endpoint: &str) -> AlbumController {
    let client = SearchClient::with_endpoint(endpoint, "test-key".to_string()).unwrap();
    AlbumController::new(
      client,
      ImageFetcher::new(),
      fx.store.clone(),
      fx.cache.clone(),
    )
  }

  #[test]
  fn test_random_page_bounds() {
    assert_eq!(random_page(0), 1);
    assert_eq!(random_page(1), 1);
    for _ in 0..50 {
      let page = random_page(7);
      assert!((1..=7).contains(&page));
    }
  }

  #[tokio::test]
  async fn test_load_album_creates_records_and_total_pages() {
    let fx = fixture();
    let base = testserver::serve_once(testserver::json_response("200 OK", SEARCH_BODY)).await;
    let albums = controller(&fx, &base);

    let pin = fx.store.create_pin(37.7, -122.4).unwrap();
    let photos = albums.load_album(pin.id).await.unwrap();

    assert_eq!(photos.len(), 2);
    assert_eq!(photos[0].image_path, "a.jpg");
    assert_eq!(photos[1].image_path, "");
    assert_eq!(fx.store.get_pin(pin.id).unwrap().total_pages, 3);
    assert_eq!(albums.album_state(pin.id), AlbumState::Loaded);
  }

  #[tokio::test]
  async fn test_load_album_skips_search_when_photos_exist() {
    let fx = fixture();
    // Unroutable endpoint: any search attempt would fail the test.
    let albums = controller(&fx, "http://127.0.0.1:1/rest/");

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    fx.store
      .create_photos(
        pin.id,
        &[crate::flickr::PhotoDescriptor {
          url_m: "http://x/a.jpg".to_string(),
        }],
      )
      .unwrap();

    let photos = albums.load_album(pin.id).await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(albums.album_state(pin.id), AlbumState::Loaded);
  }

  #[tokio::test]
  async fn test_failed_search_leaves_failed_state_and_no_records() {
    let fx = fixture();
    let albums = controller(&fx, "http://127.0.0.1:1/rest/");

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    let err = albums.load_album(pin.id).await.unwrap_err();

    assert!(err.downcast_ref::<FetchError>().is_some());
    assert!(matches!(albums.album_state(pin.id), AlbumState::Failed(_)));
    assert!(fx.store.list_photos(pin.id).unwrap().is_empty());
    // Failure also re-enables the next fetch.
    assert!(!albums.is_busy(pin.id));
  }

  #[tokio::test]
  async fn test_refresh_deletes_existing_photos_first() {
    let fx = fixture();
    let base = testserver::serve_once(testserver::json_response("200 OK", SEARCH_BODY)).await;
    let albums = controller(&fx, &base);

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    let old = fx
      .store
      .create_photos(
        pin.id,
        &[
          crate::flickr::PhotoDescriptor {
            url_m: "http://x/old1.jpg".to_string(),
          },
          crate::flickr::PhotoDescriptor {
            url_m: "http://x/old2.jpg".to_string(),
          },
        ],
      )
      .unwrap();
    fx.cache.put("old1.jpg", Some(b"one"));
    fx.cache.put("old2.jpg", Some(b"two"));

    let photos = albums.refresh_album(pin.id).await.unwrap();

    // Both prior photos evicted and replaced by the new page.
    assert_eq!(fx.cache.get("old1.jpg"), None);
    assert_eq!(fx.cache.get("old2.jpg"), None);
    assert!(fx.store.get_photo(old[0].id).is_err());
    assert_eq!(photos.len(), 2);
    assert_eq!(fx.store.list_photos(pin.id).unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_busy_pin_rejects_overlapping_refresh() {
    let fx = fixture();
    let albums = controller(&fx, "http://127.0.0.1:1/rest/");

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    albums.set_state(pin.id, AlbumState::Refreshing);

    assert!(albums.is_busy(pin.id));
    assert!(albums.refresh_album(pin.id).await.is_err());
    // The pin stays in its in-flight state; the guard refused, not the fetch.
    assert_eq!(albums.album_state(pin.id), AlbumState::Refreshing);
  }

  #[tokio::test]
  async fn test_materialize_image_downloads_then_caches() {
    let fx = fixture();
    let image = testserver::serve_once(testserver::http_response(
      "200 OK",
      "image/jpeg",
      b"jpegbytes",
    ))
    .await;
    let albums = controller(&fx, "http://127.0.0.1:1/rest/");

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    let photos = fx
      .store
      .create_photos(
        pin.id,
        &[crate::flickr::PhotoDescriptor {
          url_m: format!("{}/a.jpg", image),
        }],
      )
      .unwrap();

    let bytes = albums.materialize_image(photos[0].id).await.unwrap();
    assert_eq!(bytes, ImageBytes::Bytes(b"jpegbytes".to_vec()));
    assert_eq!(fx.cache.get("a.jpg"), Some(b"jpegbytes".to_vec()));
  }

  #[tokio::test]
  async fn test_materialize_image_hits_cache_without_network() {
    let fx = fixture();
    let albums = controller(&fx, "http://127.0.0.1:1/rest/");

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    // The URL is unroutable; only the cache can satisfy this.
    let photos = fx
      .store
      .create_photos(
        pin.id,
        &[crate::flickr::PhotoDescriptor {
          url_m: "http://127.0.0.1:1/a.jpg".to_string(),
        }],
      )
      .unwrap();
    fx.cache.put("a.jpg", Some(b"cached"));

    let bytes = albums.materialize_image(photos[0].id).await.unwrap();
    assert_eq!(bytes, ImageBytes::Bytes(b"cached".to_vec()));
  }

  #[tokio::test]
  async fn test_materialize_album_mixes_cached_and_placeholder() {
    let fx = fixture();
    let albums = controller(&fx, "http://127.0.0.1:1/rest/");

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    let photos = fx
      .store
      .create_photos(
        pin.id,
        &[
          crate::flickr::PhotoDescriptor {
            url_m: "http://127.0.0.1:1/a.jpg".to_string(),
          },
          crate::flickr::PhotoDescriptor { url_m: String::new() },
        ],
      )
      .unwrap();
    fx.cache.put("a.jpg", Some(b"cached"));

    let album = albums.materialize_album(pin.id).await.unwrap();

    assert_eq!(album.len(), 2);
    assert_eq!(album[0].0.id, photos[0].id);
    assert_eq!(album[0].1, ImageBytes::Bytes(b"cached".to_vec()));
    assert_eq!(album[1].1, ImageBytes::NoImage);
  }

  #[tokio::test]
  async fn test_materialize_image_empty_url_is_no_image() {
    let fx = fixture();
    let albums = controller(&fx, "http://127.0.0.1:1/rest/");

    let pin = fx.store.create_pin(0.0, 0.0).unwrap();
    let photos = fx
      .store
      .create_photos(pin.id, &[crate::flickr::PhotoDescriptor { url_m: String::new() }])
      .unwrap();

    let bytes = albums.materialize_image(photos[0].id).await.unwrap();
    assert_eq!(bytes, ImageBytes::NoImage);
  }
}
