//! ONNX-backed face detection (UltraFace) and embedding (ArcFace).
//!
//! Models live under the data directory's `models/` mount and are fetched
//! once if absent. Sessions are created lazily on first use so a library
//! without people photos never pays the load cost.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Pixel-space face rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// L2-normalized 512-dim embedding.
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

const DETECTION_MODEL_FILE: &str = "ultraface-320.onnx";
const DETECTION_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";
const EMBEDDING_MODEL_FILE: &str = "arcface-resnet100.onnx";
const EMBEDDING_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

pub const EMBEDDING_DIM: usize = 512;

pub struct FaceDetector {
    models_dir: PathBuf,
    detection: Mutex<Option<Session>>,
    embedding: Mutex<Option<Session>>,
}

fn ensure_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);
    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("failed to download {filename}: {e}"))?;
        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }
    Ok(model_path)
}

fn open_session(path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(path)?;
    Ok(session)
}

impl FaceDetector {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            detection: Mutex::new(None),
            embedding: Mutex::new(None),
        }
    }

    /// Detect faces and compute embeddings for each detection.
    pub fn detect(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let boxes = {
            let mut guard = self.detection.lock().unwrap();
            if guard.is_none() {
                let path = ensure_model(&self.models_dir, DETECTION_MODEL_FILE, DETECTION_MODEL_URL)?;
                *guard = Some(open_session(&path)?);
            }
            run_ultraface(guard.as_mut().unwrap(), img)?
        };

        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let (img_width, img_height) = img.dimensions();
        let mut guard = self.embedding.lock().unwrap();
        if guard.is_none() {
            let path = ensure_model(&self.models_dir, EMBEDDING_MODEL_FILE, EMBEDDING_MODEL_URL)?;
            *guard = Some(open_session(&path)?);
        }
        let session = guard.as_mut().unwrap();

        let mut faces = Vec::with_capacity(boxes.len());
        for (bbox, confidence) in boxes {
            if bbox.width <= 0 || bbox.height <= 0 {
                continue;
            }
            let crop = crop_face(img, &bbox, img_width, img_height);
            let embedding = run_arcface(session, &crop)?;
            faces.push(DetectedFace {
                bbox,
                embedding,
                confidence,
            });
        }
        Ok(faces)
    }
}

fn run_ultraface(session: &mut Session, img: &DynamicImage) -> Result<Vec<(BoundingBox, f32)>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;
    const CONFIDENCE_THRESHOLD: f32 = 0.7;
    const NMS_THRESHOLD: f32 = 0.3;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalized to (-1, 1).
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_HEIGHT as usize {
        for x in 0..INPUT_WIDTH as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_WIDTH as usize + x;
            input[idx] = (pixel[0] as f32 - 127.0) / 128.0;
            input[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
            input[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
        }
    }

    let tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input.into_boxed_slice(),
    ))?;
    let outputs = session.run(ort::inputs!["input" => tensor])?;

    let scores_value = outputs
        .get("scores")
        .ok_or_else(|| anyhow!("no scores output"))?;
    let boxes_value = outputs
        .get("boxes")
        .ok_or_else(|| anyhow!("no boxes output"))?;
    let (scores_shape, scores) = scores_value.try_extract_tensor::<f32>()?;
    let (_, box_coords) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, anchors, 2], boxes: [1, anchors, 4] normalized x1y1x2y2.
    let anchors = scores_shape[1] as usize;
    let mut found = Vec::new();
    for i in 0..anchors {
        let confidence = scores[i * 2 + 1];
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }
        let x1 = (box_coords[i * 4] * orig_width as f32) as i64;
        let y1 = (box_coords[i * 4 + 1] * orig_height as f32) as i64;
        let x2 = (box_coords[i * 4 + 2] * orig_width as f32) as i64;
        let y2 = (box_coords[i * 4 + 3] * orig_height as f32) as i64;
        found.push((
            BoundingBox {
                x: x1.max(0),
                y: y1.max(0),
                width: (x2 - x1).max(1),
                height: (y2 - y1).max(1),
            },
            confidence,
        ));
    }

    Ok(nms(found, NMS_THRESHOLD))
}

fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
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

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let union = (a.width * a.height + b.width * b.height) as f32 - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop the face region with 20% padding, clamped to the image bounds.
pub fn crop_face(
    img: &DynamicImage,
    bbox: &BoundingBox,
    img_width: u32,
    img_height: u32,
) -> DynamicImage {
    let pad_x = (bbox.width as f32 * 0.2) as i64;
    let pad_y = (bbox.height as f32 * 0.2) as i64;

    let x = (bbox.x - pad_x).max(0) as u32;
    let y = (bbox.y - pad_y).max(0) as u32;
    let w = ((bbox.width + pad_x * 2) as u32).min(img_width.saturating_sub(x));
    let h = ((bbox.height + pad_y * 2) as u32).min(img_height.saturating_sub(y));

    img.crop_imm(x, y, w.max(1), h.max(1))
}

fn run_arcface(session: &mut Session, face: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            input[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            input[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            input[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }

    let tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input.into_boxed_slice(),
    ))?;
    let outputs = session.run(ort::inputs!["data" => tensor])?;

    let output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("no embedding output"))?;
    let (_, raw) = output.1.try_extract_tensor::<f32>()?;

    let mut embedding: Vec<f32> = raw.to_vec();
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut embedding {
            *value /= norm;
        }
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_self_and_disjoint() {
        let a = BoundingBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        assert!((iou(&a, &a) - 1.0).abs() < 0.001);

        let far = BoundingBox {
            x: 20,
            y: 20,
            width: 10,
            height: 10,
        };
        assert!(iou(&a, &far).abs() < 0.001);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let a = BoundingBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        let almost_a = BoundingBox {
            x: 1,
            y: 1,
            width: 10,
            height: 10,
        };
        let far = BoundingBox {
            x: 50,
            y: 50,
            width: 10,
            height: 10,
        };
        let kept = nms(vec![(a, 0.9), (almost_a, 0.8), (far, 0.85)], 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].1, 0.9);
    }

    #[test]
    fn test_crop_face_clamps_to_bounds() {
        let img = DynamicImage::new_rgb8(100, 80);
        let edge = BoundingBox {
            x: 90,
            y: 70,
            width: 30,
            height: 30,
        };
        let crop = crop_face(&img, &edge, 100, 80);
        assert!(crop.width() >= 1 && crop.width() <= 100);
        assert!(crop.height() >= 1 && crop.height() <= 80);
    }
}
