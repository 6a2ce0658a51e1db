pub const SCHEMA: &str = r#"
-- Photos table: one row per indexed file, keyed by absolute path.
-- Rows are upserted (INSERT OR REPLACE) and never deleted automatically.
CREATE TABLE IF NOT EXISTS photos (
    path TEXT PRIMARY KEY,
    modified_at TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    location TEXT NOT NULL DEFAULT 'Unknown',
    tags TEXT NOT NULL DEFAULT '',
    caption TEXT
);

-- Faces table: raw per-photo detections. Encodings are little-endian
-- float32 arrays; matching for rename is by exact bytes, not distance.
-- Box coordinates are pixel offsets in the un-scaled source image.
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    encoding BLOB NOT NULL,
    name TEXT,
    box_top INTEGER NOT NULL DEFAULT 0,
    box_right INTEGER NOT NULL DEFAULT 0,
    box_bottom INTEGER NOT NULL DEFAULT 0,
    box_left INTEGER NOT NULL DEFAULT 0,
    confidence REAL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_faces_path ON faces(path);
CREATE INDEX IF NOT EXISTS idx_faces_name ON faces(name);
"#;
