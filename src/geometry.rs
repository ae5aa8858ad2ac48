//! Axis-aligned box geometry for detection deduplication.

/// Corner form `(x1, y1, x2, y2)` of a center-size box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x1: cx - width / 2.0,
            y1: cy - height / 2.0,
            x2: cx + width / 2.0,
            y2: cy + height / 2.0,
        }
    }

    /// Separating-axis test. Boxes that only share an edge do not intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.x2 <= other.x1 || self.x1 >= other.x2 || self.y2 <= other.y1 || self.y1 >= other.y2)
    }
}

/// Intersection test on two detections given as center plus size.
pub fn intersects(a: &crate::Detection, b: &crate::Detection) -> bool {
    a.bbox().intersects(&b.bbox())
}
