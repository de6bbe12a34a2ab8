//! Error kinds for the network-facing side of the pipeline.
//!
//! Every search and image download completes with either a value or one of
//! these kinds; nothing panics across the async boundary. A cache miss is not
//! represented here at all - `ContentCache::get` returns `Option`.

use thiserror::Error;

/// Outcome kinds for a failed search or image download.
#[derive(Debug, Error)]
pub enum FetchError {
  /// No usable response reached us (connect failure, timeout, bad URL).
  #[error("network error: {0}")]
  Transport(#[from] reqwest::Error),

  /// The API responded and marked the request as failed. Carries the
  /// human-readable status message parsed out of the response body.
  #[error("remote error: {0}")]
  Remote(String),

  /// The response body was not the structured data we expected.
  #[error("unexpected response: {0}")]
  Parse(String),

  /// The download was cancelled by its caller before it completed.
  #[error("fetch cancelled")]
  Cancelled,
}

impl FetchError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, FetchError::Cancelled)
  }
}
