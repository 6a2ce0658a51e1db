//! On-demand single-photo captioning for the detail view.
//!
//! Fetch-or-generate semantics: a stored caption is served with no model
//! call, so repeated views of the same unchanged photo never re-invoke
//! the model. When the file on disk is newer than its stored record, the
//! photo's face set is cleared and regenerated and the caption is
//! produced fresh.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

use crate::providers::{CaptionProvider, FaceDetector};
use crate::reconcile::format_mtime;
use crate::store::{FaceRecord, MetadataStore};

/// What the detail view shows for one photo.
#[derive(Debug, Clone)]
pub struct PhotoDetail {
    pub caption: String,
    pub faces: Vec<FaceRecord>,
}

/// Placeholder caption when no caption model is available.
pub const CAPTION_UNAVAILABLE: &str = "Caption unavailable";

/// Produce the detail view for one photo. Runs on a worker thread.
pub fn detail_view(
    store: &MetadataStore,
    captioner: Option<&Arc<dyn CaptionProvider>>,
    detector: Option<&Arc<dyn FaceDetector>>,
    path: &Path,
) -> Result<PhotoDetail> {
    let path_str = path.to_string_lossy().to_string();
    let rescanned = rescan_detected(store, path, &path_str)?;

    if rescanned {
        if let Some(detector) = detector {
            regenerate_faces(store, detector, path, &path_str)?;
        }
    }

    let caption = if rescanned {
        generate_caption(store, captioner, path, &path_str)?
    } else {
        fetch_or_generate_caption(store, captioner, path, &path_str)?
    };

    let faces = store.faces(&path_str)?;

    Ok(PhotoDetail { caption, faces })
}

/// Serve the stored caption when present; otherwise generate once and
/// persist.
pub fn fetch_or_generate_caption(
    store: &MetadataStore,
    captioner: Option<&Arc<dyn CaptionProvider>>,
    path: &Path,
    path_str: &str,
) -> Result<String> {
    if let Some(caption) = store.caption(path_str)? {
        tracing::debug!(path = %path.display(), "serving cached caption");
        return Ok(caption);
    }
    generate_caption(store, captioner, path, path_str)
}

fn generate_caption(
    store: &MetadataStore,
    captioner: Option<&Arc<dyn CaptionProvider>>,
    path: &Path,
    path_str: &str,
) -> Result<String> {
    let Some(captioner) = captioner else {
        return Ok(CAPTION_UNAVAILABLE.to_string());
    };

    let caption = captioner.caption(path)?;
    store.save_caption(path_str, &caption)?;
    Ok(caption)
}

/// True when the file on disk is newer than its stored record, meaning
/// cached derived data no longer describes the current pixels.
fn rescan_detected(store: &MetadataStore, path: &Path, path_str: &str) -> Result<bool> {
    let Some(record) = store.photo(path_str)? else {
        return Ok(false);
    };

    let metadata = std::fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata.modified()?.into();

    Ok(record.modified_at != format_mtime(&modified))
}

fn regenerate_faces(
    store: &MetadataStore,
    detector: &Arc<dyn FaceDetector>,
    path: &Path,
    path_str: &str,
) -> Result<()> {
    store.clear_faces(path_str)?;

    for face in detector.detect(path)? {
        if face.encoding.is_empty() {
            continue;
        }
        store.add_face(path_str, &face.encoding, None, &face.bbox, Some(face.confidence))?;
    }

    Ok(())
}
