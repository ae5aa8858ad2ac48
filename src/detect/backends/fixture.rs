use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::{DetectionRequest, DetectionService};
use crate::detect::result::Detection;
use crate::images::ImageEntry;

/// Replays recorded detections instead of calling a hosted model.
///
/// Useful offline and in tests. Detections are looked up by image id, first
/// for the exact overlap, then the image's overlap-independent list. An image
/// with no entry is an error, not an empty result.
#[derive(Default)]
pub struct FixtureDetector {
    images: HashMap<String, FixtureImage>,
    calls: AtomicUsize,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FixtureImage {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub by_overlap: HashMap<u32, Vec<Detection>>,
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    images: HashMap<String, FixtureImage>,
}

impl FixtureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection fixture {}", path.display()))?;
        let file: FixtureFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid detection fixture {}", path.display()))?;
        Ok(Self {
            images: file.images,
            calls: AtomicUsize::new(0),
        })
    }

    /// Register detections for an image, regardless of overlap.
    pub fn with_image(mut self, image_id: &str, detections: Vec<Detection>) -> Self {
        self.images.entry(image_id.to_string()).or_default().detections = detections;
        self
    }

    /// Register detections for one (image, overlap) pair.
    pub fn with_overlap(mut self, image_id: &str, overlap: u32, detections: Vec<Detection>) -> Self {
        self.images
            .entry(image_id.to_string())
            .or_default()
            .by_overlap
            .insert(overlap, detections);
        self
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectionService for FixtureDetector {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn detect(&self, image: &ImageEntry, request: DetectionRequest) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = self
            .images
            .get(&image.id)
            .ok_or_else(|| anyhow!("no recorded detections for image '{}'", image.id))?;
        let detections = entry
            .by_overlap
            .get(&request.overlap)
            .unwrap_or(&entry.detections);
        let floor = request.confidence_floor as f32 / 100.0;
        Ok(detections
            .iter()
            .filter(|d| d.confidence >= floor)
            .cloned()
            .collect())
    }
}
