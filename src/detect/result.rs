use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One object returned by the detection service.
///
/// Coordinates are in source-image pixels, with `(x, y)` the box center.
/// Confidence is normalized to `0..=1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Detection {
    pub fn new(class: ObjectClass, confidence: f32, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            class,
            confidence,
            x,
            y,
            width,
            height,
        }
    }

    /// Corner view of the detection box.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::from_center(self.x, self.y, self.width, self.height)
    }

    pub fn is_seal(&self) -> bool {
        self.class == ObjectClass::Seal
    }

    pub fn is_clump(&self) -> bool {
        self.class == ObjectClass::Clump
    }

    /// True when the confidence is strictly above a percentage threshold.
    pub fn exceeds(&self, threshold_pct: u32) -> bool {
        self.confidence > threshold_pct as f32 / 100.0
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Seal,
    Clump,
    Other,
}

impl ObjectClass {
    /// Map a service label onto a class. The hosted model labels seals as `seals`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "seal" | "seals" => ObjectClass::Seal,
            "clump" | "clumps" => ObjectClass::Clump,
            _ => ObjectClass::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_map_to_classes() {
        assert_eq!(ObjectClass::from_label("seals"), ObjectClass::Seal);
        assert_eq!(ObjectClass::from_label("Seal"), ObjectClass::Seal);
        assert_eq!(ObjectClass::from_label("clump"), ObjectClass::Clump);
        assert_eq!(ObjectClass::from_label("kelp"), ObjectClass::Other);
    }

    #[test]
    fn confidence_threshold_is_strict() {
        let det = Detection::new(ObjectClass::Seal, 0.5, 0.0, 0.0, 1.0, 1.0);
        assert!(det.exceeds(49));
        assert!(!det.exceeds(50));
    }
}
