use serde::{Deserialize, Serialize};

/// Number of facial landmarks produced per face.
pub const LANDMARK_COUNT: usize = 5;

/// A 2D coordinate, either in image space or in a canonical frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Named positions in the five-point landmark set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landmark {
    LeftEye = 0,
    RightEye = 1,
    Nose = 2,
    LeftMouth = 3,
    RightMouth = 4,
}

/// Axis-aligned box in image-space pixels.
///
/// `x2 >= x1` and `y2 >= y1` are not enforced: decoding can produce zero or
/// negative extents and every consumer tolerates them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Signed area; zero or negative for degenerate boxes.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// One detected face proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub score: f32,
    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: [Point; LANDMARK_COUNT],
}

impl Candidate {
    pub fn landmark(&self, which: Landmark) -> Point {
        self.landmarks[which as usize]
    }
}

/// 2×3 affine matrix mapping `(x, y)` to `(a·x + c·y + tx, b·x + d·y + ty)`.
///
/// ```text
/// | a  c  tx |
/// | b  d  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn apply(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.c * p.y + self.tx,
            y: self.b * p.x + self.d * p.y + self.ty,
        }
    }

    /// Inverse mapping, or `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = self.d * inv_det;
        let b = -self.b * inv_det;
        let c = -self.c * inv_det;
        let d = self.a * inv_det;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }

    /// True when the matrix has no shear or independent axis scaling.
    pub fn is_similarity(&self, tolerance: f32) -> bool {
        (self.c + self.b).abs() <= tolerance && (self.d - self.a).abs() <= tolerance
    }

    /// Uniform scale factor of a similarity transform.
    pub fn scale(&self) -> f32 {
        self.a.hypot(self.b)
    }

    /// Rotation angle of a similarity transform, in radians.
    pub fn rotation(&self) -> f32 {
        self.b.atan2(self.a)
    }

    /// Coefficients in canvas `setTransform(a, b, c, d, e, f)` order.
    pub fn to_array(&self) -> [f32; 6] {
        [self.a, self.b, self.c, self.d, self.tx, self.ty]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
