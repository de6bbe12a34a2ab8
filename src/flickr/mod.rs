//! Flickr photo-search API: search client, image downloads, wire types.

pub mod api_types;
pub mod client;
pub mod fetcher;

pub use client::SearchClient;
pub use fetcher::{FetchTask, ImageFetcher, ImageSlot};

/// One page of photo search results, as the caller sees it.
#[derive(Debug, Clone)]
pub struct PhotoPage {
  /// Total number of pages available for this query.
  pub pages: u32,
  pub photos: Vec<PhotoDescriptor>,
}

/// A single search hit.
#[derive(Debug, Clone)]
pub struct PhotoDescriptor {
  /// Medium-size image URL; empty when the photo has no downloadable image.
  pub url_m: String,
}
