use anyhow::Result;

use crate::detect::result::Detection;
use crate::images::ImageEntry;

/// Parameters fixed for one inference call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DetectionRequest {
    /// Minimum confidence (percent) the service should return.
    pub confidence_floor: u32,
    /// Non-max-suppression overlap threshold (percent).
    pub overlap: u32,
}

impl DetectionRequest {
    /// Request every candidate box the service has for this overlap.
    pub fn unfiltered(overlap: u32) -> Self {
        Self {
            confidence_floor: 0,
            overlap,
        }
    }
}

/// Detection service boundary.
///
/// Calls are expensive (network round trip) and are expected to be
/// idempotent for a fixed model version: same image and request, same boxes.
/// Implementations are shared across sweep workers and must be `Sync`.
pub trait DetectionService: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one image.
    ///
    /// An empty list means the service saw nothing. Failures must be returned
    /// as errors, never as an empty list.
    fn detect(&self, image: &ImageEntry, request: DetectionRequest) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
