//! SCRFD output decoding.
//!
//! Turns the per-stride score / box-offset / landmark-offset tensors of an
//! anchor-free SCRFD detector into image-space face candidates. All flat
//! index arithmetic lives in [`AnchorGrid`]; offsets are read through typed
//! `ndarray` views.

use crate::types::{BoundingBox, Candidate, Point, LANDMARK_COUNT};
use ndarray::{ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Named constants (no magic numbers) ---
pub const DETECTOR_INPUT_SIZE: usize = 640;
pub const DETECTOR_STRIDES: [usize; 3] = [8, 16, 32];
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.45;
const BOX_FIELDS: usize = 4;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("stride {0} does not divide the 640px model input")]
    InvalidStride(usize),
    #[error("stride {0}: score tensor is empty")]
    EmptyScores(usize),
    #[error("stride {stride}: {len} scores is not a multiple of the {cells}-cell grid")]
    AnchorMismatch {
        stride: usize,
        len: usize,
        cells: usize,
    },
    #[error("stride {stride}: {field} tensor has {actual} values, expected {expected}")]
    LengthMismatch {
        stride: usize,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("score threshold must be finite, got {0}")]
    InvalidThreshold(f32),
    #[error("invalid letterbox (scale {scale}, padding {pad_x}x{pad_y})")]
    InvalidLetterbox { scale: f32, pad_x: f32, pad_y: f32 },
    #[error("stride {stride}, anchor {index}: non-finite {field}")]
    NonFinite {
        stride: usize,
        index: usize,
        field: &'static str,
    },
    #[error("tensor view: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Letterbox parameters for fitting a `width` × `height` image into the
    /// square model input, centered, aspect ratio preserved.
    pub fn fit(width: u32, height: u32) -> Self {
        let size = DETECTOR_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        Self {
            scale,
            pad_x: (size - width as f32 * scale) / 2.0,
            pad_y: (size - height as f32 * scale) / 2.0,
        }
    }

    /// Map a point from padded model-input space back to original image space.
    pub fn to_image(&self, p: Point) -> Point {
        Point {
            x: (p.x - self.pad_x) / self.scale,
            y: (p.y - self.pad_y) / self.scale,
        }
    }

    /// Map a point from original image space into padded model-input space.
    pub fn to_input(&self, p: Point) -> Point {
        Point {
            x: p.x * self.scale + self.pad_x,
            y: p.y * self.scale + self.pad_y,
        }
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.scale.is_finite() && self.scale > 0.0 && self.pad_x.is_finite() && self.pad_y.is_finite() {
            Ok(())
        } else {
            Err(DecodeError::InvalidLetterbox {
                scale: self.scale,
                pad_x: self.pad_x,
                pad_y: self.pad_y,
            })
        }
    }
}

/// Raw detector outputs for one pyramid stride, borrowed from the inference engine.
#[derive(Debug, Clone, Copy)]
pub struct StrideTensors<'a> {
    pub stride: usize,
    /// One score per anchor.
    pub scores: &'a [f32],
    /// Four distances per anchor: left, top, right, bottom (in stride units).
    pub boxes: &'a [f32],
    /// Ten offsets per anchor: five (dx, dy) pairs (in stride units).
    pub landmarks: &'a [f32],
}

/// Anchor layout of one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorGrid {
    pub stride: usize,
    pub width: usize,
    pub height: usize,
    pub anchors_per_cell: usize,
}

impl AnchorGrid {
    /// Infer the grid for `stride` from the length of its score tensor.
    pub fn infer(stride: usize, num_scores: usize) -> Result<Self, DecodeError> {
        if stride == 0 || DETECTOR_INPUT_SIZE % stride != 0 {
            return Err(DecodeError::InvalidStride(stride));
        }
        let side = DETECTOR_INPUT_SIZE / stride;
        let cells = side * side;
        if num_scores == 0 {
            return Err(DecodeError::EmptyScores(stride));
        }
        if num_scores % cells != 0 {
            return Err(DecodeError::AnchorMismatch {
                stride,
                len: num_scores,
                cells,
            });
        }
        Ok(Self {
            stride,
            width: side,
            height: side,
            anchors_per_cell: num_scores / cells,
        })
    }

    pub fn num_anchors(&self) -> usize {
        self.width * self.height * self.anchors_per_cell
    }

    /// Model-input pixel position of the cell holding flat anchor `index`.
    pub fn origin(&self, index: usize) -> Point {
        let cell = index / self.anchors_per_cell;
        let gx = cell % self.width;
        let gy = cell / self.width;
        Point {
            x: (gx * self.stride) as f32,
            y: (gy * self.stride) as f32,
        }
    }
}

/// Shape-checked view over one stride's tensors.
struct StrideView<'a> {
    grid: AnchorGrid,
    scores: &'a [f32],
    boxes: ArrayView2<'a, f32>,
    landmarks: ArrayView3<'a, f32>,
}

impl<'a> StrideView<'a> {
    fn new(tensors: &StrideTensors<'a>) -> Result<Self, DecodeError> {
        let grid = AnchorGrid::infer(tensors.stride, tensors.scores.len())?;
        let n = grid.num_anchors();

        let expect = |field: &'static str, actual: usize, per_anchor: usize| {
            if actual == n * per_anchor {
                Ok(())
            } else {
                Err(DecodeError::LengthMismatch {
                    stride: tensors.stride,
                    field,
                    expected: n * per_anchor,
                    actual,
                })
            }
        };
        expect("box", tensors.boxes.len(), BOX_FIELDS)?;
        expect("landmark", tensors.landmarks.len(), LANDMARK_COUNT * 2)?;

        Ok(Self {
            grid,
            scores: tensors.scores,
            boxes: ArrayView2::from_shape((n, BOX_FIELDS), tensors.boxes)?,
            landmarks: ArrayView3::from_shape((n, LANDMARK_COUNT, 2), tensors.landmarks)?,
        })
    }

    fn decode_anchor(&self, index: usize, score: f32, letterbox: &Letterbox) -> Result<Candidate, DecodeError> {
        let origin = self.grid.origin(index);
        let s = self.grid.stride as f32;

        let b = self.boxes.row(index);
        let top_left = letterbox.to_image(Point::new(origin.x - b[0] * s, origin.y - b[1] * s));
        let bottom_right = letterbox.to_image(Point::new(origin.x + b[2] * s, origin.y + b[3] * s));
        let bbox = BoundingBox::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y);
        if !bbox.is_finite() {
            return Err(self.non_finite(index, "box"));
        }

        let mut landmarks = [Point::default(); LANDMARK_COUNT];
        for (k, lm) in landmarks.iter_mut().enumerate() {
            let dx = self.landmarks[[index, k, 0]];
            let dy = self.landmarks[[index, k, 1]];
            *lm = letterbox.to_image(Point::new(origin.x + dx * s, origin.y + dy * s));
            if !lm.is_finite() {
                return Err(self.non_finite(index, "landmark"));
            }
        }

        Ok(Candidate { bbox, score, landmarks })
    }

    fn non_finite(&self, index: usize, field: &'static str) -> DecodeError {
        DecodeError::NonFinite {
            stride: self.grid.stride,
            index,
            field,
        }
    }
}

/// Decode every anchor scoring at least `score_threshold` across all strides.
///
/// Candidates come out in stride order, then anchor order. Boxes and
/// landmarks are mapped back to original image space through `letterbox`.
/// Overlapping candidates are left for [`crate::nms::suppress`].
pub fn decode(
    tensors: &[StrideTensors<'_>],
    letterbox: &Letterbox,
    score_threshold: f32,
) -> Result<Vec<Candidate>, DecodeError> {
    if !score_threshold.is_finite() {
        return Err(DecodeError::InvalidThreshold(score_threshold));
    }
    letterbox.validate()?;

    let mut candidates = Vec::new();
    for t in tensors {
        let view = StrideView::new(t)?;
        let before = candidates.len();

        for (index, &score) in view.scores.iter().enumerate() {
            if !score.is_finite() {
                return Err(view.non_finite(index, "score"));
            }
            if score < score_threshold {
                continue;
            }
            candidates.push(view.decode_anchor(index, score, letterbox)?);
        }

        tracing::debug!(
            stride = t.stride,
            grid = view.grid.width,
            anchors_per_cell = view.grid.anchors_per_cell,
            candidates = candidates.len() - before,
            "decoded stride"
        );
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OwnedStride {
        stride: usize,
        scores: Vec<f32>,
        boxes: Vec<f32>,
        landmarks: Vec<f32>,
    }

    impl OwnedStride {
        fn zeros(stride: usize, anchors_per_cell: usize) -> Self {
            let side = DETECTOR_INPUT_SIZE / stride;
            let n = side * side * anchors_per_cell;
            Self {
                stride,
                scores: vec![0.0; n],
                boxes: vec![0.0; n * 4],
                landmarks: vec![0.0; n * 10],
            }
        }

        fn view(&self) -> StrideTensors<'_> {
            StrideTensors {
                stride: self.stride,
                scores: &self.scores,
                boxes: &self.boxes,
                landmarks: &self.landmarks,
            }
        }
    }

    #[test]
    fn test_letterbox_fit_landscape() {
        let lb = Letterbox::fit(1280, 960);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert!(lb.pad_x.abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        let orig = Point::new(100.0, 50.0);
        let back = lb.to_image(lb.to_input(orig));
        assert!((back.x - orig.x).abs() < 1e-3, "x: {} vs {}", back.x, orig.x);
        assert!((back.y - orig.y).abs() < 1e-3, "y: {} vs {}", back.y, orig.y);
    }

    #[test]
    fn test_anchor_grid_infer() {
        let grid = AnchorGrid::infer(8, 80 * 80 * 2).unwrap();
        assert_eq!(grid.width, 80);
        assert_eq!(grid.anchors_per_cell, 2);
        // Anchors 0 and 1 share the first cell; anchor 2 moves one cell right.
        assert_eq!(grid.origin(1), Point::new(0.0, 0.0));
        assert_eq!(grid.origin(2), Point::new(8.0, 0.0));
        // Last cell of the first row, then first cell of the second row.
        assert_eq!(grid.origin(159), Point::new(632.0, 0.0));
        assert_eq!(grid.origin(160), Point::new(0.0, 8.0));
    }

    #[test]
    fn test_anchor_grid_rejects_bad_shapes() {
        assert!(matches!(AnchorGrid::infer(0, 10), Err(DecodeError::InvalidStride(0))));
        assert!(matches!(AnchorGrid::infer(7, 10), Err(DecodeError::InvalidStride(7))));
        assert!(matches!(AnchorGrid::infer(32, 0), Err(DecodeError::EmptyScores(32))));
        assert!(matches!(
            AnchorGrid::infer(32, 401),
            Err(DecodeError::AnchorMismatch { stride: 32, len: 401, cells: 400 })
        ));
    }

    #[test]
    fn test_decode_single_anchor_inverse_letterbox() {
        let mut t = OwnedStride::zeros(32, 2);
        // Cell 65 on a 20-wide grid is (gx=5, gy=3) -> origin (160, 96); second anchor.
        let j = 2 * 65 + 1;
        t.scores[j] = 0.9;
        t.boxes[j * 4..j * 4 + 4].copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        for k in 0..5 {
            t.landmarks[j * 10 + k * 2] = 0.5;
            t.landmarks[j * 10 + k * 2 + 1] = 0.25;
        }

        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 80.0,
        };
        let faces = decode(&[t.view()], &lb, 0.45).unwrap();
        assert_eq!(faces.len(), 1);

        // Input space: (128, 32, 256, 224); image space: minus pad, over scale.
        let b = faces[0].bbox;
        assert!((b.x1 - 256.0).abs() < 1e-4, "x1 = {}", b.x1);
        assert!((b.y1 + 96.0).abs() < 1e-4, "y1 = {}", b.y1);
        assert!((b.x2 - 512.0).abs() < 1e-4, "x2 = {}", b.x2);
        assert!((b.y2 - 288.0).abs() < 1e-4, "y2 = {}", b.y2);
        assert!((faces[0].score - 0.9).abs() < 1e-6);

        // Landmarks: (176, 104) in input space.
        for lm in faces[0].landmarks {
            assert!((lm.x - 352.0).abs() < 1e-4, "lm.x = {}", lm.x);
            assert!((lm.y - 48.0).abs() < 1e-4, "lm.y = {}", lm.y);
        }
    }

    #[test]
    fn test_decode_threshold_is_inclusive() {
        let mut t = OwnedStride::zeros(32, 1);
        t.scores[0] = 0.45;
        t.scores[1] = 0.4499;
        let faces = decode(&[t.view()], &Letterbox::fit(640, 640), 0.45).unwrap();
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_decode_across_strides_in_order() {
        let mut s8 = OwnedStride::zeros(8, 2);
        let mut s16 = OwnedStride::zeros(16, 2);
        let s32 = OwnedStride::zeros(32, 2);
        s8.scores[10] = 0.6;
        s16.scores[3] = 0.8;
        s16.scores[4] = 0.7;

        let faces = decode(&[s8.view(), s16.view(), s32.view()], &Letterbox::fit(640, 640), 0.5).unwrap();
        let scores: Vec<f32> = faces.iter().map(|f| f.score).collect();
        assert_eq!(scores, vec![0.6, 0.8, 0.7]);
    }

    #[test]
    fn test_decode_no_detections_is_empty() {
        let t = OwnedStride::zeros(16, 2);
        let faces = decode(&[t.view()], &Letterbox::fit(800, 600), 0.45).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_decode_degenerate_box_is_legal() {
        let mut t = OwnedStride::zeros(32, 1);
        t.scores[0] = 0.9;
        // Zero offsets collapse the box onto the anchor point.
        let faces = decode(&[t.view()], &Letterbox::fit(640, 640), 0.45).unwrap();
        assert_eq!(faces[0].bbox.area(), 0.0);
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut t = OwnedStride::zeros(32, 2);
        t.boxes.pop();
        let err = decode(&[t.view()], &Letterbox::fit(640, 640), 0.45).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { field: "box", .. }), "{err}");

        let mut t = OwnedStride::zeros(32, 2);
        t.landmarks.extend([0.0; 10]);
        let err = decode(&[t.view()], &Letterbox::fit(640, 640), 0.45).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { field: "landmark", .. }), "{err}");
    }

    #[test]
    fn test_decode_rejects_bad_letterbox() {
        let t = OwnedStride::zeros(32, 2);
        let lb = Letterbox {
            scale: 0.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        assert!(matches!(
            decode(&[t.view()], &lb, 0.45),
            Err(DecodeError::InvalidLetterbox { .. })
        ));
        // Zero-sized image gives an infinite scale.
        assert!(decode(&[t.view()], &Letterbox::fit(0, 0), 0.45).is_err());
    }

    #[test]
    fn test_decode_rejects_non_finite_threshold() {
        let t = OwnedStride::zeros(32, 2);
        let lb = Letterbox::fit(640, 640);
        for threshold in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(matches!(
                decode(&[t.view()], &lb, threshold),
                Err(DecodeError::InvalidThreshold(_))
            ));
        }
    }

    #[test]
    fn test_decode_surfaces_non_finite_values() {
        let mut t = OwnedStride::zeros(32, 1);
        t.scores[5] = f32::NAN;
        assert!(matches!(
            decode(&[t.view()], &Letterbox::fit(640, 640), 0.45),
            Err(DecodeError::NonFinite { field: "score", index: 5, .. })
        ));

        let mut t = OwnedStride::zeros(32, 1);
        t.scores[0] = 0.9;
        t.landmarks[3] = f32::INFINITY;
        assert!(matches!(
            decode(&[t.view()], &Letterbox::fit(640, 640), 0.45),
            Err(DecodeError::NonFinite { field: "landmark", .. })
        ));
    }
}
