//! SQLite-backed metadata store for photo records and face records.
//!
//! The store is the only shared mutable resource in the system. Each
//! background worker opens its own connection against the same database
//! file; a busy timeout lets concurrent writers serialize instead of
//! failing.

mod schema;

use anyhow::Result;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use schema::SCHEMA;

/// Stored metadata for one photo, keyed by absolute path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoRecord {
    pub path: String,
    /// Last-modified timestamp as stored at index time; compared exactly
    /// against the filesystem to decide reuse vs recompute.
    pub modified_at: String,
    pub size_bytes: i64,
    pub location: String,
    pub tags: String,
    pub caption: Option<String>,
}

/// Face bounding box as (top, right, bottom, left) pixel offsets within
/// the source image's native resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    /// All-zero coordinates mean the box was never set.
    pub fn is_unset(&self) -> bool {
        self.top == 0 && self.right == 0 && self.bottom == 0 && self.left == 0
    }
}

/// One detected face stored for a photo. The (path, encoding bytes) pair
/// identifies a face for renaming purposes.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub path: String,
    pub encoding: Vec<f32>,
    pub name: Option<String>,
    pub bbox: FaceBox,
    pub confidence: Option<f32>,
}

pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // Photo operations
    // ========================================================================

    pub fn photo(&self, path: &str) -> Result<Option<PhotoRecord>> {
        let result = self.conn.query_row(
            r#"
            SELECT path, modified_at, size_bytes, location, tags, caption
            FROM photos WHERE path = ?
            "#,
            [path],
            Self::read_photo_row,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert keyed by path.
    pub fn put_photo(&self, record: &PhotoRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO photos (path, modified_at, size_bytes, location, tags, caption)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.path,
                record.modified_at,
                record.size_bytes,
                record.location,
                record.tags,
                record.caption,
            ],
        )?;
        Ok(())
    }

    /// Snapshot of every stored photo record.
    pub fn all_photos(&self) -> Result<Vec<PhotoRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, modified_at, size_bytes, location, tags, caption FROM photos",
        )?;

        let records = stmt
            .query_map([], Self::read_photo_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    pub fn caption(&self, path: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT caption FROM photos WHERE path = ?",
            [path],
            |row| row.get::<_, Option<String>>(0),
        );
        match result {
            Ok(caption) => Ok(caption),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a generated caption. When no record exists yet (the photo
    /// was viewed before the metadata pipeline reached it), a stub row is
    /// inserted; the pipeline's later upsert replaces it wholesale.
    pub fn save_caption(&self, path: &str, caption: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE photos SET caption = ? WHERE path = ?",
            params![caption, path],
        )?;
        if changed == 0 {
            self.conn.execute(
                "INSERT INTO photos (path, modified_at, size_bytes, caption) VALUES (?, '', 0, ?)",
                params![path, caption],
            )?;
        }
        Ok(())
    }

    fn read_photo_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhotoRecord> {
        Ok(PhotoRecord {
            path: row.get(0)?,
            modified_at: row.get(1)?,
            size_bytes: row.get(2)?,
            location: row.get(3)?,
            tags: row.get(4)?,
            caption: row.get(5)?,
        })
    }

    // ========================================================================
    // Face operations
    // ========================================================================

    /// Append a face detection. Duplicate detections across repeated runs
    /// are not deduplicated here; callers clear a photo's faces first when
    /// regenerating.
    pub fn add_face(
        &self,
        path: &str,
        encoding: &[f32],
        name: Option<&str>,
        bbox: &FaceBox,
        confidence: Option<f32>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO faces (path, encoding, name, box_top, box_right, box_bottom, box_left, confidence)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                path,
                encoding_to_bytes(encoding),
                name,
                bbox.top,
                bbox.right,
                bbox.bottom,
                bbox.left,
                confidence,
            ],
        )?;
        Ok(())
    }

    pub fn faces(&self, path: &str) -> Result<Vec<FaceRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT path, encoding, name, box_top, box_right, box_bottom, box_left, confidence
            FROM faces WHERE path = ?
            ORDER BY id
            "#,
        )?;

        let faces = stmt
            .query_map([path], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok(FaceRecord {
                    path: row.get(0)?,
                    encoding: bytes_to_encoding(&bytes),
                    name: row.get(2)?,
                    bbox: FaceBox {
                        top: row.get(3)?,
                        right: row.get(4)?,
                        bottom: row.get(5)?,
                        left: row.get(6)?,
                    },
                    confidence: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(faces)
    }

    /// Assign a name to a face, matched by exact encoding bytes.
    pub fn rename_face(&self, path: &str, encoding: &[f32], name: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE faces SET name = ? WHERE path = ? AND encoding = ?",
            params![name, path, encoding_to_bytes(encoding)],
        )?;
        Ok(())
    }

    pub fn clear_faces(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM faces WHERE path = ?", [path])?;
        Ok(())
    }

    /// Paths of all photos with a face assigned the given name
    /// (case-insensitive name comparison, used by person search).
    pub fn paths_with_person(&self, name: &str) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT path FROM faces WHERE name IS NOT NULL AND LOWER(name) = LOWER(?)",
        )?;

        let paths = stmt
            .query_map([name], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(paths)
    }
}

/// Convert f32 slice to little-endian bytes for storage.
pub fn encoding_to_bytes(encoding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(encoding.len() * 4);
    for &val in encoding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to an f32 vector.
pub fn bytes_to_encoding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
}
