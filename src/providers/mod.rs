//! Model providers: captioning/tagging, text embeddings, face detection.
//!
//! All providers are opaque behind traits so the pipelines and the query
//! resolver never depend on a concrete model. A provider that fails to
//! construct degrades to an empty slot on the [`crate::Library`]; callers
//! substitute placeholder values instead of erroring repeatedly.

pub mod captioner;
pub mod embedder;
pub mod faces;

use anyhow::Result;
use std::path::Path;

use crate::store::FaceBox;

pub use captioner::HttpCaptioner;
pub use embedder::{cosine_similarity, HttpEmbedder};
pub use faces::OnnxFaceDetector;

/// Placeholder written in place of model output when a provider is absent.
pub const UNAVAILABLE: &str = "unavailable";

/// Produces captions and tags for an image file.
pub trait CaptionProvider: Send + Sync {
    /// One detailed free-text caption for the image.
    fn caption(&self, image_path: &Path) -> Result<String>;

    /// Short lowercase tags describing the image.
    fn tags(&self, image_path: &Path) -> Result<Vec<String>>;
}

/// Encodes text into a fixed-length vector for similarity search.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A face found in an image, with its encoding and pixel-space box.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// L2-normalized face encoding; empty when encoding failed for this
    /// face (such faces are not persisted).
    pub encoding: Vec<f32>,
    pub bbox: FaceBox,
    pub confidence: f32,
}

/// Finds faces in an image file.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image_path: &Path) -> Result<Vec<DetectedFace>>;
}
