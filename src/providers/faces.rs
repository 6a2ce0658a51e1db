//! ONNX-based face detection and encoding.
//!
//! Detection uses UltraFace (320x240, fast); encodings come from ArcFace
//! (512-dim, L2-normalized). Models are downloaded on first use into the
//! local data directory. Both sessions are owned by the detector instance;
//! nothing is process-global.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::store::FaceBox;

use super::{DetectedFace, FaceDetector};

const DETECTION_MODEL_FILE: &str = "ultraface-320.onnx";
const DETECTION_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

const ENCODING_MODEL_FILE: &str = "arcface-resnet100.onnx";
const ENCODING_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

const CONFIDENCE_THRESHOLD: f32 = 0.7;
const NMS_THRESHOLD: f32 = 0.3;

pub struct OnnxFaceDetector {
    detection: Mutex<Session>,
    encoding: Mutex<Session>,
}

impl OnnxFaceDetector {
    /// Download models if needed and build both inference sessions.
    /// Failure here means face detection is unavailable for the session;
    /// callers skip the face pipeline rather than retrying per photo.
    pub fn load() -> Result<Self> {
        let detection_path = ensure_model(DETECTION_MODEL_FILE, DETECTION_MODEL_URL)?;
        let encoding_path = ensure_model(ENCODING_MODEL_FILE, ENCODING_MODEL_URL)?;

        let detection = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&detection_path)?;

        let encoding = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&encoding_path)?;

        Ok(Self {
            detection: Mutex::new(detection),
            encoding: Mutex::new(encoding),
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image_path: &Path) -> Result<Vec<DetectedFace>> {
        let img = image::open(image_path).map_err(|e| anyhow!("failed to load image: {}", e))?;

        let boxes = {
            let mut session = self
                .detection
                .lock()
                .map_err(|e| anyhow!("failed to lock detection model: {}", e))?;
            run_detection(&mut session, &img)?
        };

        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut session = self
            .encoding
            .lock()
            .map_err(|e| anyhow!("failed to lock encoding model: {}", e))?;

        let mut faces = Vec::new();
        for (bbox, confidence) in boxes {
            if bbox.right <= bbox.left || bbox.bottom <= bbox.top {
                continue;
            }

            let crop = crop_face(&img, &bbox);
            // A failed encoding still yields the face; it is reported with
            // an empty encoding and callers decide whether to keep it.
            let encoding = match run_encoding(&mut session, &crop) {
                Ok(enc) => enc,
                Err(e) => {
                    tracing::warn!(path = %image_path.display(), error = %e, "face encoding failed");
                    Vec::new()
                }
            };

            faces.push(DetectedFace {
                encoding,
                bbox,
                confidence,
            });
        }

        Ok(faces)
    }
}

fn models_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("could not find local data directory"))?;
    let models_dir = data_dir.join("photosift").join("models");
    std::fs::create_dir_all(&models_dir)?;
    Ok(models_dir)
}

fn ensure_model(filename: &str, url: &str) -> Result<PathBuf> {
    let model_path = models_dir()?.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

/// Run UltraFace over the full image, returning pixel-space boxes in the
/// original resolution with their confidences.
fn run_detection(session: &mut Session, img: &DynamicImage) -> Result<Vec<(FaceBox, f32)>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalized to roughly [-1, 1]
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_HEIGHT as usize {
        for x in 0..INPUT_WIDTH as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_WIDTH as usize + x;
            input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
            input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs
        .get("scores")
        .ok_or_else(|| anyhow!("no scores output"))?;
    let boxes_value = outputs
        .get("boxes")
        .ok_or_else(|| anyhow!("no boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, num_anchors, 2] (background, face)
    // boxes:  [1, num_anchors, 4] (x1, y1, x2, y2 normalized)
    let num_anchors = scores_shape[1] as usize;

    let mut face_boxes = Vec::new();
    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
        let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
        let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
        let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

        let bbox = FaceBox {
            top: y1.max(0),
            right: x2.max(1),
            bottom: y2.max(1),
            left: x1.max(0),
        };

        face_boxes.push((bbox, confidence));
    }

    Ok(nms(face_boxes, NMS_THRESHOLD))
}

/// Non-maximum suppression to drop overlapping detections.
fn nms(mut boxes: Vec<(FaceBox, f32)>, threshold: f32) -> Vec<(FaceBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(boxes[i]);

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection over union of two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let left = a.left.max(b.left);
    let top = a.top.max(b.top);
    let right = a.right.min(b.right);
    let bottom = a.bottom.min(b.bottom);

    let intersection = ((right - left).max(0) * (bottom - top).max(0)) as f32;
    let area_a = ((a.right - a.left) * (a.bottom - a.top)) as f32;
    let area_b = ((b.right - b.left) * (b.bottom - b.top)) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop the face region with 20% padding, clamped to the image bounds.
fn crop_face(img: &DynamicImage, bbox: &FaceBox) -> DynamicImage {
    let (img_width, img_height) = img.dimensions();

    let width = bbox.right - bbox.left;
    let height = bbox.bottom - bbox.top;
    let pad_x = (width as f32 * 0.2) as i32;
    let pad_y = (height as f32 * 0.2) as i32;

    let x = (bbox.left - pad_x).max(0) as u32;
    let y = (bbox.top - pad_y).max(0) as u32;
    let w = ((width + pad_x * 2) as u32).min(img_width.saturating_sub(x));
    let h = ((height + pad_y * 2) as u32).min(img_height.saturating_sub(y));

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run ArcFace over a cropped face and L2-normalize the result.
fn run_encoding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            // ArcFace normalization: (pixel - 127.5) / 127.5
            input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            input_data[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // ArcFace ONNX models use "data" as the input name
    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let encoding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("no encoding output"))?;

    let (_shape, encoding_data) = encoding_output.1.try_extract_tensor::<f32>()?;

    let encoding: Vec<f32> = encoding_data.to_vec();
    let norm: f32 = encoding.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm > 0.0 {
        Ok(encoding.iter().map(|x| x / norm).collect())
    } else {
        Ok(encoding)
    }
}
