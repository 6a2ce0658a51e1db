//! Per-photo reuse-vs-recompute decisions against the metadata store.
//!
//! Reconciliation happens once per folder load: the store snapshot is
//! fetched up front and each scanned file is resolved into a summary
//! immediately, so the foreground collection is never blocked on model
//! latency. Enrichment of the recompute branch happens asynchronously
//! afterwards (see [`crate::pipeline`]).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::scanner::location::UNKNOWN_LOCATION;
use crate::scanner::ScannedFile;
use crate::store::PhotoRecord;

/// Render a modification time the way it is stored for freshness checks.
///
/// The comparison against stored values is exact string equality, with no
/// tolerance window; filesystems with coarser-than-second mtime resolution
/// can produce spurious recomputes.
pub fn format_mtime(modified: &DateTime<Utc>) -> String {
    modified.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// One photo in the resolved collection.
#[derive(Debug, Clone)]
pub struct PhotoSummary {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub size_bytes: u64,
    pub location: String,
    pub tags: String,
    pub caption: Option<String>,
    /// True when the stored record was fresh and served verbatim; false
    /// when the photo is pending enrichment.
    pub cached: bool,
}

impl PhotoSummary {
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// Text fed to the embedding index: the caption when present, else
    /// the tags.
    pub fn index_text(&self) -> &str {
        self.caption.as_deref().unwrap_or(&self.tags)
    }

    /// The record this summary would persist as.
    pub fn to_record(&self) -> PhotoRecord {
        PhotoRecord {
            path: self.path_str(),
            modified_at: format_mtime(&self.modified),
            size_bytes: self.size_bytes as i64,
            location: self.location.clone(),
            tags: self.tags.clone(),
            caption: self.caption.clone(),
        }
    }
}

/// Resolve scanned files against a store snapshot.
///
/// A stored record whose timestamp matches the fresh stat is served
/// verbatim with no model involvement. Everything else defaults to
/// "Unknown" location and empty tags, pending enrichment, but is still
/// present in the returned collection. Output order is unspecified;
/// apply a [`SortMode`] afterwards.
pub fn reconcile(
    scanned: Vec<ScannedFile>,
    snapshot: &HashMap<String, PhotoRecord>,
) -> Vec<PhotoSummary> {
    scanned
        .into_iter()
        .map(|file| {
            let key = file.path.to_string_lossy().to_string();
            let mtime = format_mtime(&file.modified);

            match snapshot.get(&key) {
                Some(record) if record.modified_at == mtime => PhotoSummary {
                    path: file.path,
                    modified: file.modified,
                    size_bytes: file.size_bytes,
                    location: record.location.clone(),
                    tags: record.tags.clone(),
                    caption: record.caption.clone(),
                    cached: true,
                },
                _ => PhotoSummary {
                    path: file.path,
                    modified: file.modified,
                    size_bytes: file.size_bytes,
                    location: UNKNOWN_LOCATION.to_string(),
                    tags: String::new(),
                    caption: None,
                    cached: false,
                },
            }
        })
        .collect()
}

/// Collection ordering. The chosen mode persists across folder reloads
/// and re-applies to every new resolved collection; the final order
/// depends only on the current mode, not on the history of changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    /// Most recently modified first.
    #[default]
    ByDate,
    /// Largest first.
    BySize,
    /// Case-insensitive path order.
    ByName,
}

impl SortMode {
    pub fn apply(&self, photos: &mut [PhotoSummary]) {
        match self {
            SortMode::ByDate => photos.sort_by(|a, b| b.modified.cmp(&a.modified)),
            SortMode::BySize => photos.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes)),
            SortMode::ByName => photos.sort_by(|a, b| {
                a.path
                    .to_string_lossy()
                    .to_lowercase()
                    .cmp(&b.path.to_string_lossy().to_lowercase())
            }),
        }
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "date" => Ok(SortMode::ByDate),
            "size" => Ok(SortMode::BySize),
            "name" => Ok(SortMode::ByName),
            other => Err(format!("unknown sort mode: {}", other)),
        }
    }
}
