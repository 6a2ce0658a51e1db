//! Caption/tag enrichment pipeline.
//!
//! Processes the recompute subset of one resolved collection strictly in
//! collection order, refreshing the GPS location and fetching tags for
//! each photo, then upserting the full record. A per-photo failure is
//! logged and skipped; it never halts the rest of the run.

use anyhow::Result;
use std::sync::Arc;

use crate::providers::{CaptionProvider, UNAVAILABLE};
use crate::reconcile::PhotoSummary;
use crate::scanner::location;
use crate::store::MetadataStore;

use super::{PipelineUpdate, WorkerHandle};

/// Run the metadata pipeline over `photos`. Runs on a worker thread with
/// its own store connection.
pub fn run(
    store: &MetadataStore,
    photos: &[PhotoSummary],
    captioner: Option<&Arc<dyn CaptionProvider>>,
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
                "metadata pipeline superseded by newer folder load, discarding remaining writes"
            );
            handle.send(PipelineUpdate::Cancelled);
            return;
        }

        match enrich_photo(store, photo, captioner) {
            Ok(()) => processed += 1,
            Err(e) => {
                failed += 1;
                tracing::error!(path = %photo.path.display(), error = %e, "metadata enrichment failed");
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

fn enrich_photo(
    store: &MetadataStore,
    photo: &PhotoSummary,
    captioner: Option<&Arc<dyn CaptionProvider>>,
) -> Result<()> {
    let mut record = photo.to_record();

    record.location = location::gps_location(&photo.path);
    record.tags = match captioner {
        Some(captioner) => captioner.tags(&photo.path)?.join(", "),
        None => UNAVAILABLE.to_string(),
    };
    // Keep a caption the detail view may already have produced
    if record.caption.is_none() {
        record.caption = store.caption(&record.path)?;
    }

    store.put_photo(&record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineHub, PipelineKind};
    use crate::reconcile::{format_mtime, reconcile};
    use crate::scanner::ScannedFile;
    use anyhow::anyhow;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockCaptioner {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl MockCaptioner {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }

        fn failing_on(path: &'static str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: Some(path),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CaptionProvider for MockCaptioner {
        fn caption(&self, _image_path: &Path) -> Result<String> {
            Ok("a mock caption".to_string())
        }

        fn tags(&self, image_path: &Path) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_on) = self.fail_on {
                if image_path.to_string_lossy().contains(fail_on) {
                    return Err(anyhow!("mock failure"));
                }
            }
            Ok(vec!["dog".to_string(), "park".to_string()])
        }
    }

    fn summary(path: &str, secs: i64) -> PhotoSummary {
        let scanned = ScannedFile {
            path: PathBuf::from(path),
            modified: Utc.timestamp_opt(secs, 0).unwrap(),
            size_bytes: 42,
        };
        reconcile(vec![scanned], &HashMap::new()).remove(0)
    }

    #[test]
    fn test_pipeline_writes_records_and_reports_progress() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let handle = hub.handle(PipelineKind::Metadata, hub.next_generation());

        let photos = vec![summary("/p/a.jpg", 100), summary("/p/b.jpg", 200)];
        let captioner: Arc<dyn CaptionProvider> = Arc::new(MockCaptioner::new());

        run(&store, &photos, Some(&captioner), &handle);

        let stored = store.photo("/p/a.jpg").unwrap().unwrap();
        assert_eq!(stored.tags, "dog, park");
        assert_eq!(
            stored.modified_at,
            format_mtime(&Utc.timestamp_opt(100, 0).unwrap())
        );

        let events = hub.poll();
        let progress = events
            .iter()
            .filter(|e| matches!(e.update, PipelineUpdate::Progress { .. }))
            .count();
        assert_eq!(progress, 2, "a progress report after every item");
        assert!(events
            .iter()
            .any(|e| matches!(e.update, PipelineUpdate::Completed { processed: 2, failed: 0 })));
    }

    #[test]
    fn test_per_photo_failure_does_not_abort_run() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let handle = hub.handle(PipelineKind::Metadata, hub.next_generation());

        let photos = vec![summary("/p/bad.jpg", 100), summary("/p/good.jpg", 200)];
        let captioner: Arc<dyn CaptionProvider> = Arc::new(MockCaptioner::failing_on("bad"));

        run(&store, &photos, Some(&captioner), &handle);

        assert!(store.photo("/p/bad.jpg").unwrap().is_none());
        assert!(store.photo("/p/good.jpg").unwrap().is_some());

        let events = hub.poll();
        assert!(events
            .iter()
            .any(|e| matches!(e.update, PipelineUpdate::Completed { processed: 1, failed: 1 })));
    }

    #[test]
    fn test_missing_captioner_degrades_to_placeholder() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let handle = hub.handle(PipelineKind::Metadata, hub.next_generation());

        run(&store, &[summary("/p/a.jpg", 100)], None, &handle);

        let stored = store.photo("/p/a.jpg").unwrap().unwrap();
        assert_eq!(stored.tags, UNAVAILABLE);
    }

    #[test]
    fn test_pipeline_is_idempotent_on_unchanged_folder() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();
        let mock = Arc::new(MockCaptioner::new());
        let captioner: Arc<dyn CaptionProvider> = mock.clone();

        let photos = vec![summary("/p/a.jpg", 100), summary("/p/b.jpg", 200)];

        let handle = hub.handle(PipelineKind::Metadata, hub.next_generation());
        run(&store, &photos, Some(&captioner), &handle);
        let first = store.all_photos().unwrap();

        // Second load of the same unchanged folder: every record is now
        // fresh, so the recompute subset is empty and nothing is rewritten
        let snapshot: HashMap<_, _> = first.iter().map(|r| (r.path.clone(), r.clone())).collect();
        let rescanned: Vec<ScannedFile> = photos
            .iter()
            .map(|p| ScannedFile {
                path: p.path.clone(),
                modified: p.modified,
                size_bytes: p.size_bytes,
            })
            .collect();
        let resolved = reconcile(rescanned, &snapshot);
        let pending: Vec<PhotoSummary> = resolved.into_iter().filter(|p| !p.cached).collect();
        assert!(pending.is_empty());

        let handle = hub.handle(PipelineKind::Metadata, hub.next_generation());
        run(&store, &pending, Some(&captioner), &handle);

        let second = store.all_photos().unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.calls(), 2, "one tags call per photo, first run only");
    }

    #[test]
    fn test_superseded_generation_discards_writes() {
        let store = MetadataStore::open_in_memory().unwrap();
        let hub = PipelineHub::new();

        let stale = hub.handle(PipelineKind::Metadata, hub.next_generation());
        // A newer folder load starts before the stale pipeline runs
        hub.next_generation();

        let captioner: Arc<dyn CaptionProvider> = Arc::new(MockCaptioner::new());
        run(&store, &[summary("/p/a.jpg", 100)], Some(&captioner), &stale);

        assert!(
            store.photo("/p/a.jpg").unwrap().is_none(),
            "no cross-generation contamination"
        );
        assert!(hub.poll().is_empty(), "stale events are discarded too");
    }
}
