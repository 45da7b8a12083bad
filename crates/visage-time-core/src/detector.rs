//! Face detection via ONNX Runtime.
//!
//! Four pretrained bundles are loaded from the model directory: a tiny
//! anchor-based face detector (UltraFace RFB-320 layout), a 68-point landmark
//! regressor, a recognition network and an 8-class expression classifier
//! (FER+ layout). Detection returns every face with landmarks and expression
//! probabilities; no descriptor matching is performed here.

use crate::types::{BoundingBox, Expressions, FaceRegion};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Tiny face detector ---
const DETECTOR_INPUT_WIDTH: usize = 320;
const DETECTOR_INPUT_HEIGHT: usize = 240;
const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_SCORE_THRESHOLD: f32 = 0.5;
const DETECTOR_NMS_THRESHOLD: f32 = 0.3;

// --- 68-point landmarks ---
const LANDMARK_INPUT_SIZE: usize = 112;
const LANDMARK_POINTS: usize = 68;

// --- Expressions ---
const EXPRESSION_INPUT_SIZE: usize = 64;
const EXPRESSION_CLASSES: usize = 8;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model bundle {bundle} not found at {path}")]
    ModelNotFound { bundle: ModelBundle, path: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A pretrained asset set consumed by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBundle {
    TinyFaceDetector,
    FaceLandmark68,
    FaceRecognition,
    FaceExpression,
}

impl ModelBundle {
    pub const ALL: [ModelBundle; 4] = [
        ModelBundle::TinyFaceDetector,
        ModelBundle::FaceLandmark68,
        ModelBundle::FaceRecognition,
        ModelBundle::FaceExpression,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ModelBundle::TinyFaceDetector => "tiny_face_detector.onnx",
            ModelBundle::FaceLandmark68 => "face_landmark_68.onnx",
            ModelBundle::FaceRecognition => "face_recognition.onnx",
            ModelBundle::FaceExpression => "face_expression.onnx",
        }
    }

    pub fn path_in(self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.file_name())
    }
}

impl fmt::Display for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelBundle::TinyFaceDetector => "tinyFaceDetector",
            ModelBundle::FaceLandmark68 => "faceLandmark68Net",
            ModelBundle::FaceRecognition => "faceRecognitionNet",
            ModelBundle::FaceExpression => "faceExpressionNet",
        })
    }
}

/// Bundles missing from `model_dir`. Used as a startup hint only.
pub fn check_models(model_dir: &Path) -> Vec<ModelBundle> {
    ModelBundle::ALL
        .into_iter()
        .filter(|b| !b.path_in(model_dir).exists())
        .collect()
}

fn load_session(model_dir: &Path, bundle: ModelBundle) -> Result<Session, DetectorError> {
    let path = bundle.path_in(model_dir);
    if !path.exists() {
        return Err(DetectorError::ModelNotFound {
            bundle,
            path: path.to_string_lossy().into_owned(),
        });
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(&path)?;

    tracing::info!(
        bundle = %bundle,
        path = %path.display(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded model bundle"
    );

    Ok(session)
}

/// Detector plus landmark and expression networks.
pub struct FaceDetector {
    detector: Session,
    landmarks: Session,
    /// Loaded with the other bundles; identification does not use it yet.
    #[allow(dead_code)]
    recognition: Session,
    expressions: Session,
    /// (scores, boxes) output indices of the detector.
    detector_outputs: (usize, usize),
}

impl FaceDetector {
    /// Load all four bundles from `model_dir`. Fails on the first missing one.
    pub fn load(model_dir: &Path) -> Result<Self, DetectorError> {
        let detector = load_session(model_dir, ModelBundle::TinyFaceDetector)?;
        let landmarks = load_session(model_dir, ModelBundle::FaceLandmark68)?;
        let recognition = load_session(model_dir, ModelBundle::FaceRecognition)?;
        let expressions = load_session(model_dir, ModelBundle::FaceExpression)?;

        let names: Vec<String> = detector
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "face detector requires 2 outputs (scores, boxes), got {}",
                names.len()
            )));
        }
        let detector_outputs = discover_detector_outputs(&names);

        Ok(Self {
            detector,
            landmarks,
            recognition,
            expressions,
            detector_outputs,
        })
    }

    /// Detect all faces in a packed RGB frame, highest confidence first.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        let (w, h) = (width as usize, height as usize);
        let expected = w * h * 3;
        if rgb.len() < expected || w == 0 || h == 0 {
            return Err(DetectorError::InvalidFrame {
                expected,
                actual: rgb.len(),
            });
        }

        let boxes = self.detect_boxes(rgb, w, h)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let crop = SquareCrop::around(&bbox, w, h);
            let landmarks = self.run_landmarks(rgb, w, &crop)?;
            let expressions = self.run_expressions(rgb, w, &crop)?;
            faces.push(FaceRegion {
                bbox,
                landmarks,
                expressions,
            });
        }

        Ok(faces)
    }

    fn detect_boxes(
        &mut self,
        rgb: &[u8],
        w: usize,
        h: usize,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let resized = resize_bilinear_rgb(rgb, w, h, DETECTOR_INPUT_WIDTH, DETECTOR_INPUT_HEIGHT);
        let input = rgb_to_tensor(&resized, DETECTOR_INPUT_WIDTH, DETECTOR_INPUT_HEIGHT, |p| {
            (p - DETECTOR_MEAN) / DETECTOR_STD
        });

        let (score_idx, box_idx) = self.detector_outputs;
        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[score_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[box_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode_boxes(scores, boxes, w as f32, h as f32, DETECTOR_SCORE_THRESHOLD);
        Ok(nms(candidates, DETECTOR_NMS_THRESHOLD))
    }

    fn run_landmarks(
        &mut self,
        rgb: &[u8],
        frame_width: usize,
        crop: &SquareCrop,
    ) -> Result<Vec<(f32, f32)>, DetectorError> {
        let patch = crop.extract_rgb(rgb, frame_width);
        let resized = resize_bilinear_rgb(&patch, crop.side, crop.side, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE);
        let input = rgb_to_tensor(&resized, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, |p| p / 255.0);

        let outputs = self
            .landmarks
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("landmarks: {e}")))?;

        if raw.len() < LANDMARK_POINTS * 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {} landmark values, got {}",
                LANDMARK_POINTS * 2,
                raw.len()
            )));
        }

        // Normalized to the crop; map back to frame pixels.
        let side = crop.side as f32;
        Ok(raw[..LANDMARK_POINTS * 2]
            .chunks_exact(2)
            .map(|p| (crop.x as f32 + p[0] * side, crop.y as f32 + p[1] * side))
            .collect())
    }

    fn run_expressions(
        &mut self,
        rgb: &[u8],
        frame_width: usize,
        crop: &SquareCrop,
    ) -> Result<Expressions, DetectorError> {
        let patch = crop.extract_rgb(rgb, frame_width);
        let gray = rgb_to_luma(&patch);
        let resized = resize_bilinear_gray(&gray, crop.side, crop.side, EXPRESSION_INPUT_SIZE, EXPRESSION_INPUT_SIZE);

        let mut input = Array4::<f32>::zeros((1, 1, EXPRESSION_INPUT_SIZE, EXPRESSION_INPUT_SIZE));
        for y in 0..EXPRESSION_INPUT_SIZE {
            for x in 0..EXPRESSION_INPUT_SIZE {
                input[[0, 0, y, x]] = resized[y * EXPRESSION_INPUT_SIZE + x] as f32;
            }
        }

        let outputs = self
            .expressions
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("expressions: {e}")))?;

        if logits.len() < EXPRESSION_CLASSES {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {EXPRESSION_CLASSES} expression logits, got {}",
                logits.len()
            )));
        }
        Ok(expressions_from_logits(&logits[..EXPRESSION_CLASSES]))
    }
}

/// Find (scores, boxes) by name, else assume positional [scores, boxes].
fn discover_detector_outputs(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "detector output names not recognized, using positional mapping");
            (0, 1)
        }
    }
}

/// Decode `[N, 2]` class scores and `[N, 4]` normalized corner boxes.
fn decode_boxes(
    scores: &[f32],
    boxes: &[f32],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let count = (scores.len() / 2).min(boxes.len() / 4);
    let mut out = Vec::new();

    for i in 0..count {
        let confidence = scores[i * 2 + 1];
        if confidence <= threshold {
            continue;
        }
        let x1 = boxes[i * 4].clamp(0.0, 1.0) * frame_w;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * frame_h;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * frame_w;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * frame_h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    out
}

/// Non-Maximum Suppression: keep the highest-confidence box of each cluster.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// FER+ order: neutral, happiness, surprise, sadness, anger, disgust, fear,
/// contempt. Contempt has no counterpart and is dropped before renormalizing.
fn expressions_from_logits(logits: &[f32]) -> Expressions {
    let probs = softmax(&logits[..7]);
    Expressions {
        neutral: probs[0],
        happy: probs[1],
        surprised: probs[2],
        sad: probs[3],
        angry: probs[4],
        disgusted: probs[5],
        fearful: probs[6],
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|v| v / sum).collect()
}

/// Square region around a face, clamped to the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SquareCrop {
    x: usize,
    y: usize,
    side: usize,
}

impl SquareCrop {
    fn around(bbox: &BoundingBox, frame_w: usize, frame_h: usize) -> Self {
        let max_side = frame_w.min(frame_h).max(1);
        let side = (bbox.width.max(bbox.height).round() as usize).clamp(1, max_side);
        let cx = bbox.x + bbox.width / 2.0;
        let cy = bbox.y + bbox.height / 2.0;
        let x = (cx - side as f32 / 2.0).round().max(0.0) as usize;
        let y = (cy - side as f32 / 2.0).round().max(0.0) as usize;
        Self {
            x: x.min(frame_w - side),
            y: y.min(frame_h - side),
            side,
        }
    }

    fn extract_rgb(&self, rgb: &[u8], frame_width: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.side * self.side * 3);
        for row in self.y..self.y + self.side {
            let start = (row * frame_width + self.x) * 3;
            out.extend_from_slice(&rgb[start..start + self.side * 3]);
        }
        out
    }
}

fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32).round() as u8)
        .collect()
}

/// Packed RGB into a normalized NCHW tensor.
fn rgb_to_tensor(rgb: &[u8], width: usize, height: usize, norm: impl Fn(f32) -> f32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, height, width));
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            for c in 0..3 {
                tensor[[0, c, y, x]] = norm(rgb[idx + c] as f32);
            }
        }
    }
    tensor
}

fn resize_bilinear_rgb(src: &[u8], w: usize, h: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    resize_bilinear(src, w, h, new_w, new_h, 3)
}

fn resize_bilinear_gray(src: &[u8], w: usize, h: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    resize_bilinear(src, w, h, new_w, new_h, 1)
}

fn resize_bilinear(
    src: &[u8],
    w: usize,
    h: usize,
    new_w: usize,
    new_h: usize,
    channels: usize,
) -> Vec<u8> {
    let scale_x = w as f32 / new_w as f32;
    let scale_y = h as f32 / new_h as f32;
    let mut out = vec![0u8; new_w * new_h * channels];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..channels {
                let px = |yy: usize, xx: usize| src[(yy * w + xx) * channels + c] as f32;
                let val = px(y0, x0) * (1.0 - fx) * (1.0 - fy)
                    + px(y0, x1) * fx * (1.0 - fy)
                    + px(y1, x0) * (1.0 - fx) * fy
                    + px(y1, x1) * fx * fy;
                out[(y * new_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}
