//! The application context: store, providers, the resolved collection and
//! its sort state, and the pipeline hub. Constructed once at startup and
//! passed into everything that needs it; there is no global state.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::LoadError;
use crate::pipeline::{
    self, caption::PhotoDetail, Generation, PipelineEvent, PipelineHub, PipelineKind,
    PipelineUpdate,
};
use crate::providers::{
    CaptionProvider, EmbeddingProvider, FaceDetector, HttpCaptioner, HttpEmbedder,
    OnnxFaceDetector,
};
use crate::reconcile::{self, PhotoSummary, SortMode};
use crate::scanner;
use crate::search::QueryResolver;
use crate::store::{FaceRecord, MetadataStore, PhotoRecord};

pub struct Library {
    config: Config,
    store: MetadataStore,
    captioner: Option<Arc<dyn CaptionProvider>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    detector: Option<Arc<dyn FaceDetector>>,
    photos: Vec<PhotoSummary>,
    sort: SortMode,
    /// Shared with search worker threads, which may call the embedder.
    resolver: Arc<Mutex<QueryResolver>>,
    hub: PipelineHub,
    /// Pipelines spawned for the current generation and not yet finished.
    active: usize,
}

impl Library {
    /// Open the store and construct the real providers. A provider that
    /// fails to come up degrades that feature for the whole session; it
    /// is reported once here, not per photo.
    pub fn open(config: Config) -> Result<Self> {
        let captioner: Option<Arc<dyn CaptionProvider>> =
            match HttpCaptioner::connect(&config.captioner) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    tracing::warn!(error = %e, "caption provider unavailable, tags and captions degrade to placeholders");
                    None
                }
            };

        let embedder: Option<Arc<dyn EmbeddingProvider>> =
            match HttpEmbedder::connect(&config.captioner) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    tracing::warn!(error = %e, "embedding provider unavailable, semantic search degrades to unfiltered results");
                    None
                }
            };

        let detector: Option<Arc<dyn FaceDetector>> = match OnnxFaceDetector::load() {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                tracing::warn!(error = %e, "face detector unavailable, skipping face enrichment");
                None
            }
        };

        Self::with_providers(config, captioner, embedder, detector)
    }

    /// Construct with explicit provider instances.
    pub fn with_providers(
        config: Config,
        captioner: Option<Arc<dyn CaptionProvider>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        detector: Option<Arc<dyn FaceDetector>>,
    ) -> Result<Self> {
        let store = MetadataStore::open(&config.db_path)?;
        store.initialize()?;

        let resolver = Arc::new(Mutex::new(QueryResolver::new(
            config.search.similarity_threshold,
            config.search.max_results,
        )));

        Ok(Self {
            config,
            store,
            captioner,
            embedder,
            detector,
            photos: Vec::new(),
            sort: SortMode::default(),
            resolver,
            hub: PipelineHub::new(),
            active: 0,
        })
    }

    pub fn photos(&self) -> &[PhotoSummary] {
        &self.photos
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort
    }

    /// Scan a folder, resolve it against the store snapshot, and spawn the
    /// enrichment pipelines for whatever needs recomputing. The resolved
    /// collection is available immediately; enrichment lands in the store
    /// asynchronously and is observable through later reads.
    pub fn load_folder(&mut self, folder: &Path) -> Result<(), LoadError> {
        let scanned = scanner::scan_folder(folder, &self.config.scanner.image_extensions)?;
        if scanned.is_empty() {
            return Err(LoadError::NoImagesFound(folder.to_path_buf()));
        }

        // One snapshot per load; a snapshot failure just means everything
        // recomputes
        let snapshot: HashMap<String, PhotoRecord> = match self.store.all_photos() {
            Ok(records) => records.into_iter().map(|r| (r.path.clone(), r)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "could not snapshot store, recomputing all photos");
                HashMap::new()
            }
        };

        let mut photos = reconcile::reconcile(scanned, &snapshot);
        self.sort.apply(&mut photos);

        tracing::info!(
            folder = %folder.display(),
            total = photos.len(),
            cached = photos.iter().filter(|p| p.cached).count(),
            "folder loaded"
        );

        self.photos = photos;
        self.invalidate_search_index();

        let generation = self.hub.next_generation();
        self.active = 0;
        self.spawn_pipelines(generation);

        Ok(())
    }

    fn spawn_pipelines(&mut self, generation: Generation) {
        let pending: Vec<PhotoSummary> =
            self.photos.iter().filter(|p| !p.cached).cloned().collect();
        if pending.is_empty() {
            tracing::info!("collection fully cached, no enrichment needed");
            return;
        }

        {
            let handle = self.hub.handle(PipelineKind::Metadata, generation);
            let db_path = self.config.db_path.clone();
            let captioner = self.captioner.clone();
            let photos = pending.clone();

            std::thread::spawn(move || match MetadataStore::open(&db_path) {
                Ok(store) => pipeline::metadata::run(&store, &photos, captioner.as_ref(), &handle),
                Err(e) => handle.send(PipelineUpdate::Failed {
                    error: format!("failed to open store: {}", e),
                }),
            });
            self.active += 1;
        }

        if let Some(detector) = self.detector.clone() {
            let handle = self.hub.handle(PipelineKind::Faces, generation);
            let db_path = self.config.db_path.clone();

            std::thread::spawn(move || match MetadataStore::open(&db_path) {
                Ok(store) => pipeline::faces::run(&store, &pending, &detector, &handle),
                Err(e) => handle.send(PipelineUpdate::Failed {
                    error: format!("failed to open store: {}", e),
                }),
            });
            self.active += 1;
        } else {
            tracing::info!("face detector unavailable, skipping face enrichment");
        }
    }

    /// Change the collection ordering. The mode persists across reloads.
    pub fn set_sort(&mut self, mode: SortMode) {
        self.sort = mode;
        self.sort.apply(&mut self.photos);
        self.invalidate_search_index();
    }

    fn invalidate_search_index(&self) {
        if let Ok(mut resolver) = self.resolver.lock() {
            resolver.invalidate();
        }
    }

    /// Resolve a query against the current collection, blocking the
    /// calling thread. The semantic fallback may invoke the embedding
    /// provider; interactive callers should prefer [`Self::request_search`].
    pub fn search(&self, query: &str) -> Result<Vec<PhotoSummary>> {
        let mut resolver = self
            .resolver
            .lock()
            .map_err(|e| anyhow!("search resolver lock poisoned: {}", e))?;
        resolver.resolve(
            query,
            &self.photos,
            self.hub.current_generation(),
            &self.store,
            self.embedder.as_deref(),
        )
    }

    /// Resolve a query on a worker thread; the result arrives on the
    /// returned channel. Exact-match queries complete near-instantly, but
    /// the semantic fallback can block on the embedding provider, so the
    /// model call stays off the calling thread.
    pub fn request_search(&self, query: &str) -> mpsc::Receiver<Result<Vec<PhotoSummary>>> {
        let (tx, rx) = mpsc::channel();
        let query = query.to_string();
        let photos = self.photos.clone();
        let generation = self.hub.current_generation();
        let db_path = self.config.db_path.clone();
        let resolver = Arc::clone(&self.resolver);
        let embedder = self.embedder.clone();

        std::thread::spawn(move || {
            let result = MetadataStore::open(&db_path).and_then(|store| {
                let mut resolver = resolver
                    .lock()
                    .map_err(|e| anyhow!("search resolver lock poisoned: {}", e))?;
                resolver.resolve(&query, &photos, generation, &store, embedder.as_deref())
            });
            let _ = tx.send(result);
        });

        rx
    }

    /// Detail view for one photo: its caption (cached, or generated once)
    /// and stored faces, regenerated when the file changed on disk. Model
    /// calls run on a dedicated worker thread; the result arrives on the
    /// returned channel.
    pub fn request_details(&self, path: &Path) -> mpsc::Receiver<Result<PhotoDetail>> {
        let (tx, rx) = mpsc::channel();
        let db_path = self.config.db_path.clone();
        let captioner = self.captioner.clone();
        let detector = self.detector.clone();
        let path: PathBuf = path.to_path_buf();

        std::thread::spawn(move || {
            let result = MetadataStore::open(&db_path).and_then(|store| {
                pipeline::caption::detail_view(
                    &store,
                    captioner.as_ref(),
                    detector.as_ref(),
                    &path,
                )
            });
            let _ = tx.send(result);
        });

        rx
    }

    pub fn faces(&self, path: &Path) -> Result<Vec<FaceRecord>> {
        self.store.faces(&path.to_string_lossy())
    }

    /// Assign a user-supplied name to a face, matched by exact encoding
    /// bytes.
    pub fn rename_face(&self, path: &Path, encoding: &[f32], name: &str) -> Result<()> {
        self.store
            .rename_face(&path.to_string_lossy(), encoding, name)
    }

    /// Drain pipeline events. Stale-generation events were already
    /// discarded by the hub; completions invalidate the search index so
    /// newly arrived captions become searchable.
    pub fn poll_updates(&mut self) -> Vec<PipelineEvent> {
        let events = self.hub.poll();

        for event in &events {
            match event.update {
                PipelineUpdate::Completed { .. }
                | PipelineUpdate::Cancelled
                | PipelineUpdate::Failed { .. } => {
                    self.active = self.active.saturating_sub(1);
                    self.invalidate_search_index();
                }
                _ => {}
            }
        }

        events
    }

    pub fn has_active_pipelines(&self) -> bool {
        self.active > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DetectedFace;
    use crate::store::FaceBox;
    use anyhow::anyhow;
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct MockCaptioner {
        calls: AtomicUsize,
    }

    impl CaptionProvider for MockCaptioner {
        fn caption(&self, _image_path: &Path) -> Result<String> {
            Ok("a mock caption".to_string())
        }

        fn tags(&self, image_path: &Path) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stem = image_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| anyhow!("no file name"))?;
            Ok(vec![stem, "mock".to_string()])
        }
    }

    struct MockDetector;

    impl FaceDetector for MockDetector {
        fn detect(&self, _image_path: &Path) -> Result<Vec<DetectedFace>> {
            Ok(vec![DetectedFace {
                encoding: vec![0.5, 0.5],
                bbox: FaceBox {
                    top: 1,
                    right: 9,
                    bottom: 9,
                    left: 1,
                },
                confidence: 0.9,
            }])
        }
    }

    struct Fixture {
        _dirs: (TempDir, TempDir),
        library: Library,
        captioner: Arc<MockCaptioner>,
        folder: PathBuf,
    }

    fn fixture(with_detector: bool) -> Fixture {
        let photo_dir = TempDir::new().unwrap();
        let data_dir = TempDir::new().unwrap();

        for name in ["a.jpg", "b.jpg"] {
            let mut file = File::create(photo_dir.path().join(name)).unwrap();
            file.write_all(b"jpeg bytes").unwrap();
        }

        let config = Config {
            db_path: data_dir.path().join("test.db"),
            ..Config::default()
        };

        let captioner = Arc::new(MockCaptioner {
            calls: AtomicUsize::new(0),
        });
        let detector: Option<Arc<dyn FaceDetector>> = if with_detector {
            Some(Arc::new(MockDetector))
        } else {
            None
        };

        let library = Library::with_providers(
            config,
            Some(captioner.clone() as Arc<dyn CaptionProvider>),
            None,
            detector,
        )
        .unwrap();

        let folder = photo_dir.path().to_path_buf();
        Fixture {
            _dirs: (photo_dir, data_dir),
            library,
            captioner,
            folder,
        }
    }

    fn wait_for_pipelines(library: &mut Library) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while library.has_active_pipelines() {
            library.poll_updates();
            assert!(Instant::now() < deadline, "pipelines did not finish in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_load_folder_without_images_is_an_error() {
        let mut fx = fixture(false);
        let empty = TempDir::new().unwrap();
        File::create(empty.path().join("notes.txt")).unwrap();

        match fx.library.load_folder(empty.path()) {
            Err(LoadError::NoImagesFound(_)) => {}
            other => panic!("expected NoImagesFound, got {:?}", other),
        }
        assert!(fx.library.photos().is_empty());
    }

    #[test]
    fn test_recomputed_photos_are_visible_immediately_then_enriched() {
        let mut fx = fixture(true);
        fx.library.load_folder(&fx.folder).unwrap();

        // Visible before enrichment, with cleared derived fields
        assert_eq!(fx.library.photos().len(), 2);
        assert!(fx.library.photos().iter().all(|p| !p.cached));
        assert!(fx.library.photos().iter().all(|p| p.tags.is_empty()));

        wait_for_pipelines(&mut fx.library);

        // Enrichment landed in the store and faces were detected
        let a = fx.folder.join("a.jpg");
        assert_eq!(fx.library.faces(&a).unwrap().len(), 1);
        assert_eq!(fx.captioner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_second_load_reuses_cached_records() {
        let mut fx = fixture(false);
        fx.library.load_folder(&fx.folder).unwrap();
        wait_for_pipelines(&mut fx.library);
        assert_eq!(fx.captioner.calls.load(Ordering::SeqCst), 2);

        fx.library.load_folder(&fx.folder).unwrap();
        wait_for_pipelines(&mut fx.library);

        // Everything was fresh: served from the store, no model calls
        assert!(fx.library.photos().iter().all(|p| p.cached));
        assert!(fx
            .library
            .photos()
            .iter()
            .any(|p| p.tags.contains("mock")));
        assert_eq!(fx.captioner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sort_mode_persists_across_reloads() {
        let mut fx = fixture(false);
        fx.library.set_sort(SortMode::ByName);
        fx.library.load_folder(&fx.folder).unwrap();
        wait_for_pipelines(&mut fx.library);

        assert_eq!(fx.library.sort_mode(), SortMode::ByName);
        let names: Vec<String> = fx.library.photos().iter().map(|p| p.path_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|n| n.to_lowercase());
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_rename_face_via_library() {
        let mut fx = fixture(true);
        fx.library.load_folder(&fx.folder).unwrap();
        wait_for_pipelines(&mut fx.library);

        let a = fx.folder.join("a.jpg");
        let faces = fx.library.faces(&a).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].name, None);

        fx.library
            .rename_face(&a, &faces[0].encoding, "Tina")
            .unwrap();
        let faces = fx.library.faces(&a).unwrap();
        assert_eq!(faces[0].name.as_deref(), Some("Tina"));

        // And person search finds the photo, on either search path
        let results = fx.library.search("with Tina").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, a);

        let results = fx
            .library
            .request_search("with Tina")
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, a);
    }

    #[test]
    fn test_request_details_serves_cached_caption_without_model() {
        let mut fx = fixture(false);
        fx.library.load_folder(&fx.folder).unwrap();
        wait_for_pipelines(&mut fx.library);

        let a = fx.folder.join("a.jpg");

        let detail = fx
            .library
            .request_details(&a)
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(detail.caption, "a mock caption");

        // Second view is served from the store
        let detail = fx
            .library
            .request_details(&a)
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(detail.caption, "a mock caption");
    }
}
