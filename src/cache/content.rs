//! Disk-backed store for downloaded image bytes.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

/// Key -> bytes cache persisted to a directory of files.
///
/// Identifiers may contain arbitrary characters; each entry is stored under
/// the hex SHA-256 of its identifier, so keys never collide and never touch
/// the filesystem with unsafe path components. A miss is a normal outcome,
/// not an error, and disk failures degrade to miss/skip: the cache is an
/// optimization over re-downloading, never a source of truth.
#[derive(Debug, Clone)]
pub struct ContentCache {
  root: PathBuf,
}

impl ContentCache {
  /// Open a cache rooted at the given directory, creating it if needed.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    std::fs::create_dir_all(&root)
      .map_err(|e| eyre!("Failed to create cache directory {}: {}", root.display(), e))?;
    Ok(Self { root })
  }

  /// File holding the entry for this identifier.
  fn entry_path(&self, identifier: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    self.root.join(hex::encode(hasher.finalize()))
  }

  /// Read the cached bytes for an identifier. Returns `None` on a miss, for
  /// the empty identifier, and on any disk error.
  pub fn get(&self, identifier: &str) -> Option<Vec<u8>> {
    if identifier.is_empty() {
      return None;
    }
    match std::fs::read(self.entry_path(identifier)) {
      Ok(bytes) => Some(bytes),
      Err(e) if e.kind() == ErrorKind::NotFound => None,
      Err(e) => {
        warn!("cache read failed for {}: {}", identifier, e);
        None
      }
    }
  }

  /// Store bytes under an identifier, overwriting any previous entry.
  ///
  /// A `None` payload is a no-op, so a failed download never clobbers a
  /// previously cached image. Disk errors are logged and swallowed.
  pub fn put(&self, identifier: &str, bytes: Option<&[u8]>) {
    let Some(bytes) = bytes else { return };
    if identifier.is_empty() {
      return;
    }
    if let Err(e) = std::fs::write(self.entry_path(identifier), bytes) {
      warn!("cache write failed for {}: {}", identifier, e);
    }
  }

  /// Remove the entry for an identifier. Deleting an absent entry succeeds
  /// silently.
  pub fn delete(&self, identifier: &str) {
    if identifier.is_empty() {
      return;
    }
    match std::fs::remove_file(self.entry_path(identifier)) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => warn!("cache delete failed for {}: {}", identifier, e),
    }
  }

  /// Whether an entry exists for this identifier.
  pub fn contains(&self, identifier: &str) -> bool {
    !identifier.is_empty() && self.entry_path(identifier).exists()
  }
}
