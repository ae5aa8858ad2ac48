//! Beach image sets and source-image access.
//!
//! A beach is the unit hyperparameters are tuned for. Each image is identified
//! by its filename stem, which must match the ground-truth table.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

/// Extensions accepted when discovering beach images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageEntry {
    /// Filename stem.
    pub id: String,
    pub path: PathBuf,
}

impl ImageEntry {
    pub fn new(id: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            path: path.into(),
        }
    }

    /// Build an entry from a path, deriving the id from the file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("image path {} has no usable file stem", path.display()))?
            .to_string();
        Ok(Self { id, path })
    }
}

#[derive(Clone, Debug)]
pub struct Beach {
    pub name: String,
    pub images: Vec<ImageEntry>,
}

impl Beach {
    /// Build a beach from explicit image paths. Stems must be unique.
    pub fn new(name: &str, images: Vec<ImageEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for image in &images {
            if !seen.insert(image.id.as_str()) {
                return Err(anyhow!(
                    "beach '{}' has more than one image with id '{}'",
                    name,
                    image.id
                ));
            }
        }
        Ok(Self {
            name: name.to_string(),
            images,
        })
    }

    /// Build a beach from every image file in a directory.
    pub fn from_dir(name: &str, dir: &Path) -> Result<Self> {
        Self::new(name, discover_images(dir)?)
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// List the images of one beach directory, sorted by file name.
///
/// Every regular file must be an image; subdirectories are ignored.
pub fn discover_images(dir: &Path) -> Result<Vec<ImageEntry>> {
    if !dir.is_dir() {
        return Err(anyhow!("beach folder {} does not exist", dir.display()));
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list beach folder {}", dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to list beach folder {}", dir.display()))?
            .path();
        if !path.is_file() {
            continue;
        }
        if !is_image_file(&path) {
            return Err(anyhow!(
                "beach folder {} contains non-image file {}",
                dir.display(),
                path.display()
            ));
        }
        paths.push(path);
    }
    paths.sort();
    paths.into_iter().map(ImageEntry::from_path).collect()
}

/// Source-image access for clump cropping.
pub trait ImageStore: Send + Sync {
    fn load(&self, image: &ImageEntry) -> Result<RgbImage>;
}

/// Decodes images from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsImageStore;

impl ImageStore for FsImageStore {
    fn load(&self, image: &ImageEntry) -> Result<RgbImage> {
        let decoded = image::open(&image.path)
            .with_context(|| format!("failed to decode image {}", image.path.display()))?;
        Ok(decoded.to_rgb8())
    }
}
