//! Face enrichment pipeline.
//!
//! Detects faces for the recompute subset of one resolved collection, in
//! collection order, appending a record per face with a non-empty
//! encoding. Detections are not deduplicated at write time; the detail
//! view clears a photo's faces before regenerating them.

use anyhow::Result;
use std::sync::Arc;

use crate::providers::FaceDetector;
use crate::reconcile::PhotoSummary;
use crate::store::MetadataStore;

use super::{PipelineUpdate, WorkerHandle};

/// Run the face pipeline over `photos`. Runs on a worker thread with its
/// own store connection; only spawned when a detector is available.
pub fn run(
    store: &MetadataStore,
    photos: &[PhotoSummary],
    detector: &Arc<dyn FaceDetector>,
    handle: &WorkerHandle,
) {
    let total = photos.len();
    handle.send(PipelineUpdate::Started { total });

    let mut processed = 0;
    let mut failed = 0;

    for (index, photo) in photos.iter().enumerate() {
        if handle.cancelled() {
            handle.send(PipelineUpdate::Cancelled);
            return;
        }
        if handle.superseded() {
            tracing::info!(
                generation = handle.generation,
                "face pipeline superseded by newer folder load, discarding remaining writes"
            );
            handle.send(PipelineUpdate::Cancelled);
            return;
        }

        match detect_and_store(store, photo, detector) {
            Ok(count) => {
                processed += 1;
                if count > 0 {
                    tracing::debug!(path = %photo.path.display(), count, "stored faces");
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(path = %photo.path.display(), error = %e, "face detection failed");
            }
        }

        handle.send(PipelineUpdate::Progress {
            processed: index + 1,
            total,
            path: photo.path_str(),
        });
    }

    handle.send(PipelineUpdate::Completed { processed, failed });
}

fn detect_and_store(
    store: &MetadataStore,
    photo: &PhotoSummary,
    detector: &Arc<dyn FaceDetector>,
) -> Result<usize> {
    let path = photo.path_str();
    let mut stored = 0;

    for face in detector.detect(&photo.path)? {
        // Faces the encoder could not process are dropped, matching the
        // store's contract that every record carries an encoding
        if face.encoding.is_empty() {
            continue;
        }
        store.add_face(&path, &face.encoding, None, &face.bbox, Some(face.confidence))?;
        stored += 1;
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineHub, PipelineKind};
    use crate::providers::DetectedFace;
    use crate::reconcile::reconcile;
    use crate::scanner::ScannedFile;
    use crate::store::FaceBox;
    use anyhow::anyhow;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    struct MockDetector;

    impl FaceDetector for MockDetector {
        fn detect(&self, image_path: &Path) -> Result<Vec<DetectedFace>> {
            let name = image_path.to_string_lossy();
            if name.contains("broken") {
                return Err(anyhow!("mock decode failure"));
            }
            if name.contains("empty") {
                return Ok(vec![DetectedFace {
                    encoding: Vec::new(),
                    bbox: FaceBox::default(),
                    confidence: 0.5,
                }]);
            }
            Ok(vec![DetectedFace {
                encoding: vec![0.25, 0.5, 0.25],
                bbox: FaceBox {
                    top: 5,
                    right: 40,
                    bottom: 45,
                    left: 10,
                },
                confidence: 0.92,
            }])
        }
    }

    fn summary(path: &str) -> PhotoSummary {
        let scanned = ScannedFile {
            path: PathBuf::from(path),
            modified: Utc.timestamp_opt(100, 0).unwrap(),
            size_bytes: 10,
        };
        reconcile(vec![scanned], &HashMap::new()).remove(0)
    }

    #[test]
    fn test_faces_stored_with_boxes() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let handle = hub.handle(PipelineKind::Faces, hub.next_generation());
        let detector: Arc<dyn FaceDetector> = Arc::new(MockDetector);

        run(&store, &[summary("/p/a.jpg")], &detector, &handle);

        let faces = store.faces("/p/a.jpg").unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].encoding, vec![0.25, 0.5, 0.25]);
        assert_eq!(faces[0].bbox.top, 5);
        assert_eq!(faces[0].bbox.left, 10);
        assert_eq!(faces[0].name, None);
    }

    #[test]
    fn test_faces_without_encoding_are_dropped() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let handle = hub.handle(PipelineKind::Faces, hub.next_generation());
        let detector: Arc<dyn FaceDetector> = Arc::new(MockDetector);

        run(&store, &[summary("/p/empty.jpg")], &detector, &handle);

        assert!(store.faces("/p/empty.jpg").unwrap().is_empty());
    }

    #[test]
    fn test_detection_failure_continues_with_next_photo() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let handle = hub.handle(PipelineKind::Faces, hub.next_generation());
        let detector: Arc<dyn FaceDetector> = Arc::new(MockDetector);

        run(
            &store,
            &[summary("/p/broken.jpg"), summary("/p/b.jpg")],
            &detector,
            &handle,
        );

        assert_eq!(store.faces("/p/b.jpg").unwrap().len(), 1);

        let events = hub.poll();
        assert!(events
            .iter()
            .any(|e| matches!(e.update, PipelineUpdate::Completed { processed: 1, failed: 1 })));
    }

    #[test]
    fn test_superseded_generation_stores_nothing() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let stale = hub.handle(PipelineKind::Faces, hub.next_generation());
        hub.next_generation();

        let detector: Arc<dyn FaceDetector> = Arc::new(MockDetector);
        run(&store, &[summary("/p/a.jpg")], &detector, &stale);

        assert!(store.faces("/p/a.jpg").unwrap().is_empty());
    }
}
