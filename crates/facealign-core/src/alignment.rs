//! Face alignment via 4-DOF similarity transform.
//!
//! Estimates the least-squares similarity (uniform scale, rotation,
//! translation) from detected landmarks to a canonical layout, and warps
//! the face into the canonical frame.

use crate::types::{AffineTransform, Point, LANDMARK_COUNT};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ArcFace reference landmarks for a 112×112 output.
pub const ARCFACE_REFERENCE_112: [Point; LANDMARK_COUNT] = [
    Point::new(38.2946, 51.6963), // left eye
    Point::new(73.5318, 51.5014), // right eye
    Point::new(56.0252, 71.7366), // nose
    Point::new(41.5493, 92.3655), // left mouth
    Point::new(70.7299, 92.2041), // right mouth
];

pub const ARCFACE_ALIGNED_SIZE: u32 = 112;

#[derive(Error, Debug, PartialEq)]
pub enum AlignError {
    #[error("{src} source points but {dst} target points")]
    LengthMismatch { src: usize, dst: usize },
    #[error("similarity estimation needs at least 2 point pairs, got {0}")]
    TooFewPoints(usize),
    #[error("point {0} is not finite")]
    NonFiniteInput(usize),
    #[error("estimated transform is not finite")]
    NonFinite,
    #[error("transform is singular and cannot be inverted for warping")]
    Singular,
}

/// Target frame that faces are aligned into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLayout {
    /// Side length of the square aligned output, in pixels.
    pub size: u32,
    /// Landmark positions in the output frame, same order as detections.
    pub points: [Point; LANDMARK_COUNT],
}

impl CanonicalLayout {
    pub fn arcface_112() -> Self {
        Self {
            size: ARCFACE_ALIGNED_SIZE,
            points: ARCFACE_REFERENCE_112,
        }
    }
}

impl Default for CanonicalLayout {
    fn default() -> Self {
        Self::arcface_112()
    }
}

/// Estimate the similarity transform mapping `src` onto `dst` with least
/// squared error (closed-form Umeyama for the 2D case).
///
/// If every source point coincides the scale falls back to 1 and only the
/// centroid translation is meaningful.
pub fn estimate_similarity_transform(src: &[Point], dst: &[Point]) -> Result<AffineTransform, AlignError> {
    if src.len() != dst.len() {
        return Err(AlignError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.len() < 2 {
        return Err(AlignError::TooFewPoints(src.len()));
    }
    if let Some(i) = src.iter().chain(dst).position(|p| !p.is_finite()) {
        return Err(AlignError::NonFiniteInput(i % src.len()));
    }

    let (src_mx, src_my) = centroid(src);
    let (dst_mx, dst_my) = centroid(dst);

    let mut src_var = 0.0f64;
    let mut cos_acc = 0.0f64;
    let mut sin_acc = 0.0f64;
    for (s, d) in src.iter().zip(dst) {
        let (sx, sy) = (s.x as f64 - src_mx, s.y as f64 - src_my);
        let (dx, dy) = (d.x as f64 - dst_mx, d.y as f64 - dst_my);
        src_var += sx * sx + sy * sy;
        cos_acc += sx * dx + sy * dy;
        sin_acc += sx * dy - sy * dx;
    }

    let scale = if src_var == 0.0 {
        1.0
    } else {
        (cos_acc * cos_acc + sin_acc * sin_acc).sqrt() / src_var
    };
    let angle = sin_acc.atan2(cos_acc);
    let a = scale * angle.cos();
    let b = scale * angle.sin();

    // Centroid must map onto centroid.
    let tx = dst_mx - (a * src_mx - b * src_my);
    let ty = dst_my - (b * src_mx + a * src_my);

    let m = AffineTransform {
        a: a as f32,
        b: b as f32,
        c: -b as f32,
        d: a as f32,
        tx: tx as f32,
        ty: ty as f32,
    };
    if !m.is_finite() {
        return Err(AlignError::NonFinite);
    }
    Ok(m)
}

fn centroid(points: &[Point]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0f64, 0.0f64), |(ax, ay), p| (ax + p.x as f64, ay + p.y as f64));
    (sx / n, sy / n)
}

/// Apply a 2×3 affine warp to produce a `width` × `height` output image.
///
/// Each output pixel is mapped back through the inverse transform and
/// sampled bilinearly. Out-of-bounds samples are black.
pub fn warp_affine(
    image: &RgbImage,
    transform: &AffineTransform,
    width: u32,
    height: u32,
) -> Result<RgbImage, AlignError> {
    let inv = transform.inverse().ok_or(AlignError::Singular)?;
    let (src_w, src_h) = (image.width() as i64, image.height() as i64);

    let sample = |x: i64, y: i64, ch: usize| -> f32 {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            image.get_pixel(x as u32, y as u32)[ch] as f32
        } else {
            0.0
        }
    };

    Ok(RgbImage::from_fn(width, height, |ox, oy| {
        let src = inv.apply(Point::new(ox as f32, oy as f32));

        let x0 = src.x.floor() as i64;
        let y0 = src.y.floor() as i64;
        let fx = src.x - x0 as f32;
        let fy = src.y - y0 as f32;

        let mut out = [0u8; 3];
        for (ch, v) in out.iter_mut().enumerate() {
            let val = sample(x0, y0, ch) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, ch) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, ch) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, ch) * fx * fy;
            *v = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    }))
}

/// Align a detected face into the canonical frame of `layout`.
pub fn align_face(
    image: &RgbImage,
    landmarks: &[Point; LANDMARK_COUNT],
    layout: &CanonicalLayout,
) -> Result<RgbImage, AlignError> {
    let m = estimate_similarity_transform(landmarks, &layout.points)?;
    warp_affine(image, &m, layout.size, layout.size)
}
