//! Serde-deserializable types matching the Flickr REST API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;
use std::collections::HashMap;

/// Top-level search response envelope.
///
/// Successful responses carry `stat: "ok"` and a `photos` object; failures
/// carry a non-ok `stat` and usually a `message`.
#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse {
  pub photos: Option<ApiPhotoPage>,
  #[serde(default)]
  pub stat: String,
  pub message: Option<String>,
}

/// One page of search results.
#[derive(Debug, Deserialize)]
pub struct ApiPhotoPage {
  #[serde(default)]
  pub pages: u32,
  #[serde(default)]
  pub photo: Vec<ApiPhotoDescriptor>,
}

/// A single photo descriptor within a page.
///
/// `url_m` is the medium-size image URL requested via `extras=url_m`; the
/// API omits it for photos without one. Everything else the API sends is
/// kept in the catch-all so callers can ignore fields we don't model.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPhotoDescriptor {
  pub url_m: Option<String>,
  #[serde(flatten)]
  pub extra: HashMap<String, serde_json::Value>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

use super::{PhotoDescriptor, PhotoPage};

impl ApiPhotoPage {
  pub fn into_page(self) -> PhotoPage {
    PhotoPage {
      pages: self.pages,
      photos: self
        .photo
        .into_iter()
        .map(|d| PhotoDescriptor {
          url_m: d.url_m.unwrap_or_default(),
        })
        .collect(),
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

/// Pull a human-readable failure message out of an API error body.
///
/// Failure bodies carry a `message` and a `stat` field; either serves as the
/// message, `message` preferred. Returns `None` when the body is not JSON or
/// has neither, so the caller can fall back to the underlying error.
pub fn error_message_from_body(body: &[u8]) -> Option<String> {
  let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
  let object = parsed.as_object()?;

  if let Some(message) = object.get("message").and_then(|v| v.as_str()) {
    return Some(message.to_string());
  }

  object
    .get("stat")
    .and_then(|v| v.as_str())
    .map(String::from)
}
