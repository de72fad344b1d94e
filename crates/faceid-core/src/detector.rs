//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD detection model (with its five-point landmark head) over RGB
//! images: letterboxed input, 3-stride anchor decoding, NMS post-processing.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the source image sits inside the square model input.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    new_w: usize,
    new_h: usize,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    input_height: usize,
    input_width: usize,
    /// (score, bbox, kps) output indices for each of `SCRFD_STRIDES`.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Open the SCRFD model and work out which output tensor is which.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded face detection model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "expected 9 detector outputs (score, bbox and kps for 3 strides), got {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            stride_indices: discover_output_indices(&output_names),
        })
    }

    /// Find faces in `image`, strongest first, in the image's own pixel space.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let letterbox = letterbox_for(
            image.width() as usize,
            image.height() as usize,
            self.input_width,
            self.input_height,
        );
        let input = letterbox_tensor(image, &letterbox, self.input_width, self.input_height);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let extract = |idx: usize, what: &str, stride: usize| {
            outputs[idx]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
        };

        let mut candidates = Vec::new();
        let strides = SCRFD_STRIDES.iter().zip(&self.stride_indices);
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in strides {
            let head = StrideHead {
                stride,
                scores: extract(score_idx, "scores", stride)?,
                boxes: extract(bbox_idx, "boxes", stride)?,
                landmarks: extract(kps_idx, "landmarks", stride)?,
            };
            candidates.extend(head.decode(
                (self.input_width, self.input_height),
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "face detection complete");
        Ok(faces)
    }
}

impl LetterboxInfo {
    /// Map a point from model input space back to the source image.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Scale and centring offsets that fit `width`x`height` inside the model input.
fn letterbox_for(
    width: usize,
    height: usize,
    input_width: usize,
    input_height: usize,
) -> LetterboxInfo {
    let scale = (input_width as f32 / width as f32).min(input_height as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_width);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_height);

    LetterboxInfo {
        scale,
        pad_x: (input_width - new_w) as f32 / 2.0,
        pad_y: (input_height - new_h) as f32 / 2.0,
        new_w,
        new_h,
    }
}

/// Resize into the letterbox and normalize to NCHW floats.
///
/// Padding stays at 0.0, which is what `SCRFD_MEAN` normalizes to.
fn letterbox_tensor(
    image: &RgbImage,
    letterbox: &LetterboxInfo,
    input_width: usize,
    input_height: usize,
) -> Array4<f32> {
    let resized = imageops::resize(
        image,
        letterbox.new_w as u32,
        letterbox.new_h as u32,
        FilterType::Triangle,
    );
    let left = letterbox.pad_x.floor() as usize;
    let top = letterbox.pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, input_height, input_width));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (left + x as usize, top + y as usize);
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, c, ty, tx]] = (value as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    tensor
}

/// Map each stride to its (score, bbox, kps) output index.
///
/// Exports either name their outputs `score_8`, `bbox_16`, `kps_32`, ... or use
/// bare numbers. Unrecognized names get the standard positional layout:
/// scores at 0-2, boxes at 3-5, landmarks at 6-8.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    const POSITIONAL: [StrideOutputIndices; 3] = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];

    let position = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = |stride: usize| {
        Some((
            position("score", stride)?,
            position("bbox", stride)?,
            position("kps", stride)?,
        ))
    };

    match (by_name(SCRFD_STRIDES[0]), by_name(SCRFD_STRIDES[1]), by_name(SCRFD_STRIDES[2])) {
        (Some(s8), Some(s16), Some(s32)) => {
            tracing::debug!("detector outputs mapped by name");
            [s8, s16, s32]
        }
        _ => {
            tracing::info!(?names, "detector output names not recognized, using positional layout");
            POSITIONAL
        }
    }
}

/// Raw head outputs for one stride level.
struct StrideHead<'a> {
    stride: usize,
    scores: &'a [f32],
    boxes: &'a [f32],
    landmarks: &'a [f32],
}

impl StrideHead<'_> {
    /// Turn anchors scoring above `threshold` into boxes in source image space.
    ///
    /// Box and landmark offsets are in stride units from the anchor centre.
    fn decode(
        &self,
        input: (usize, usize),
        letterbox: &LetterboxInfo,
        threshold: f32,
    ) -> Vec<BoundingBox> {
        let grid_w = input.0 / self.stride;
        let anchors = grid_w * (input.1 / self.stride) * SCRFD_ANCHORS_PER_CELL;
        let step = self.stride as f32;

        self.scores
            .iter()
            .take(anchors)
            .enumerate()
            .filter(|&(_, &score)| score > threshold)
            .filter_map(|(anchor, &score)| {
                let cell = anchor / SCRFD_ANCHORS_PER_CELL;
                let (cx, cy) = ((cell % grid_w) as f32 * step, (cell / grid_w) as f32 * step);

                let d = self.boxes.get(anchor * 4..anchor * 4 + 4)?;
                let (x1, y1) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
                let (x2, y2) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);

                let landmarks = self.landmarks.get(anchor * 10..anchor * 10 + 10).map(|k| {
                    std::array::from_fn(|i| {
                        letterbox.to_source(cx + k[2 * i] * step, cy + k[2 * i + 1] * step)
                    })
                });

                Some(BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: score,
                    landmarks,
                })
            })
            .collect()
    }
}

/// Greedy non-maximum suppression. Output is sorted by confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: size,
            height: size,
            confidence,
            landmarks: None,
        }
    }

    fn unpadded(scale: f32, side: usize) -> LetterboxInfo {
        LetterboxInfo {
            scale,
            pad_x: 0.0,
            pad_y: 0.0,
            new_w: side,
            new_h: side,
        }
    }

    /// Output names as `{prefix}_{stride}`, in the given nesting order.
    fn names(outer_by_stride: bool, prefixes: [&str; 3]) -> Vec<String> {
        let mut out = Vec::new();
        if outer_by_stride {
            for stride in SCRFD_STRIDES {
                out.extend(prefixes.iter().map(|p| format!("{p}_{stride}")));
            }
        } else {
            for p in prefixes {
                out.extend(SCRFD_STRIDES.iter().map(|stride| format!("{p}_{stride}")));
            }
        }
        out
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlap() {
        let kept = nms(
            vec![
                scored(5.0, 5.0, 100.0, 0.8),
                scored(200.0, 200.0, 50.0, 0.7),
                scored(0.0, 0.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, [0.9, 0.7]);
    }

    #[test]
    fn test_nms_disjoint_and_empty() {
        let kept = nms(vec![scored(0.0, 0.0, 10.0, 0.9), scored(50.0, 50.0, 10.0, 0.8)], 0.4);
        assert_eq!(kept.len(), 2);
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_wide_image() {
        let letterbox = letterbox_for(320, 240, 640, 640);
        assert_eq!((letterbox.new_w, letterbox.new_h), (640, 480));
        assert_eq!(letterbox.pad_x, 0.0);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);

        let (x, y) = letterbox.to_source(100.0 * letterbox.scale, 50.0 * letterbox.scale + 80.0);
        assert!((x - 100.0).abs() < 0.1 && (y - 50.0).abs() < 0.1, "got ({x}, {y})");
    }

    #[test]
    fn test_letterbox_tall_image() {
        let letterbox = letterbox_for(300, 600, 640, 640);
        assert_eq!((letterbox.new_w, letterbox.new_h), (320, 640));
        assert!((letterbox.pad_x - 160.0).abs() < 1e-6);
        assert_eq!(letterbox.pad_y, 0.0);
    }

    #[test]
    fn test_decode_maps_back_to_image_space() {
        // 64x64 input at stride 32: a 2x2 grid with 2 anchors per cell.
        let mut scores = vec![0.0f32; 8];
        scores[2] = 0.9; // row 0, col 1
        let mut boxes = vec![0.0f32; 8 * 4];
        boxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        let mut landmarks = vec![0.0f32; 8 * 10];
        landmarks[20..22].copy_from_slice(&[0.25, 0.5]);
        let head = StrideHead {
            stride: 32,
            scores: &scores,
            boxes: &boxes,
            landmarks: &landmarks,
        };
        let faces = head.decode((64, 64), &unpadded(2.0, 64), 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!((f.x, f.y, f.width, f.height), (8.0, 0.0, 16.0, 16.0));
        let lms = f.landmarks.unwrap();
        assert_eq!(lms[0], (20.0, 8.0));
        assert_eq!(lms[1], (16.0, 0.0));
    }

    #[test]
    fn test_decode_without_landmark_head() {
        let scores = [0.0, 0.6];
        let boxes = [0.0f32; 8];
        let head = StrideHead {
            stride: 8,
            scores: &scores,
            boxes: &boxes,
            landmarks: &[],
        };
        let faces = head.decode((8, 8), &unpadded(1.0, 8), 0.5);
        assert_eq!(faces.len(), 1);
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn test_output_indices_by_name() {
        let ordered = names(false, ["score", "bbox", "kps"]);
        assert_eq!(discover_output_indices(&ordered), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);

        // bbox_8, kps_8, score_8, bbox_16, ...
        let grouped = names(true, ["bbox", "kps", "score"]);
        assert_eq!(discover_output_indices(&grouped), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_output_indices_positional_fallback() {
        let numeric: Vec<String> = (428..437).map(|i| i.to_string()).collect();
        assert_eq!(discover_output_indices(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_letterbox_tensor_padding_and_channels() {
        let image = RgbImage::from_pixel(64, 32, image::Rgb([255, 0, 128]));
        let letterbox = letterbox_for(64, 32, 64, 64);
        let tensor = letterbox_tensor(&image, &letterbox, 64, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);

        // Top rows are padding.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 0, 63]], 0.0);

        let expected = |v: f32| (v - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 32, 32]] - expected(255.0)).abs() < 1e-5);
        assert!((tensor[[0, 1, 32, 32]] - expected(0.0)).abs() < 1e-5);
        assert!((tensor[[0, 2, 32, 32]] - expected(128.0)).abs() < 1e-5);
    }
}
