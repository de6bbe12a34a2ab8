//! SQLite schema for the pin and photo tables.

/// Schema, applied idempotently on every open.
///
/// Photo deletion is done in code rather than with ON DELETE CASCADE: each
/// deleted photo must also evict its image-cache entry, which SQLite cannot
/// do for us.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    total_pages INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pin_id INTEGER NOT NULL REFERENCES pins(id),
    image_url TEXT NOT NULL,
    image_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_pin ON photos(pin_id);
"#;
