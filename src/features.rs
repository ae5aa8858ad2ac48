//! Clump crop geometry and the per-crop feature vector fed to the count regressor.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::Detection;

/// Number of regressor input columns.
pub const FEATURE_COUNT: usize = 8;

/// Column names, in regressor input order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "width", "height", "avg_r", "sd_r", "avg_g", "sd_g", "avg_b", "sd_b",
];

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub width: f64,
    pub height: f64,
    pub avg_r: f64,
    pub sd_r: f64,
    pub avg_g: f64,
    pub sd_g: f64,
    pub avg_b: f64,
    pub sd_b: f64,
}

impl FeatureVector {
    pub fn to_row(&self) -> [f64; FEATURE_COUNT] {
        [
            self.width,
            self.height,
            self.avg_r,
            self.sd_r,
            self.avg_g,
            self.sd_g,
            self.avg_b,
            self.sd_b,
        ]
    }
}

/// How the three color statistics are sampled from a crop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSampling {
    /// Statistics the shipped regression model was trained on: row 1 across
    /// all channels, column 1 across all channels, then channel 1 everywhere.
    #[default]
    Legacy,
    /// Mean and standard deviation of each color channel over the whole crop.
    FullChannel,
}

/// Pixel rectangle in source-image coordinates. It may extend past the
/// image edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// Crop rectangle for a detection: each corner rounded to the nearest pixel,
/// halves to even. The result may be empty.
pub fn crop_region(detection: &Detection) -> CropRect {
    let bbox = detection.bbox();
    let px = |v: f32| v.round_ties_even() as i64;
    let (x1, y1, x2, y2) = (px(bbox.x1), px(bbox.y1), px(bbox.x2), px(bbox.y2));
    let span = |lo: i64, hi: i64| u32::try_from((hi - lo).max(0)).unwrap_or(u32::MAX);
    CropRect {
        x: x1,
        y: y1,
        width: span(x1, x2),
        height: span(y1, y2),
    }
}

/// Cut a clump out of its source image. Pixels outside the image are black.
pub fn crop_clump(image: &RgbImage, detection: &Detection) -> RgbImage {
    let rect = crop_region(detection);
    let mut crop = RgbImage::new(rect.width, rect.height);
    imageops::replace(&mut crop, image, -rect.x, -rect.y);
    crop
}

pub fn extract_features(crop: &RgbImage, sampling: ChannelSampling) -> Result<FeatureVector> {
    let (w, h) = crop.dimensions();
    let [r, g, b] = match sampling {
        ChannelSampling::Legacy => legacy_stats(crop)?,
        ChannelSampling::FullChannel => full_channel_stats(crop)?,
    };
    Ok(FeatureVector {
        width: w as f64,
        height: h as f64,
        avg_r: r.0,
        sd_r: r.1,
        avg_g: g.0,
        sd_g: g.1,
        avg_b: b.0,
        sd_b: b.1,
    })
}

fn legacy_stats(crop: &RgbImage) -> Result<[(f64, f64); 3]> {
    let (w, h) = crop.dimensions();
    if w < 2 || h < 2 {
        return Err(anyhow!(
            "crop of {}x{} is too small for legacy sampling (needs 2x2)",
            w,
            h
        ));
    }
    let row = (0..w).flat_map(|x| crop.get_pixel(x, 1).0);
    let column = (0..h).flat_map(|y| crop.get_pixel(1, y).0);
    let green = crop.pixels().map(|p| p.0[1]);
    Ok([mean_std(row), mean_std(column), mean_std(green)])
}

fn full_channel_stats(crop: &RgbImage) -> Result<[(f64, f64); 3]> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err(anyhow!("cannot compute channel statistics of an empty crop"));
    }
    let channel = |c: usize| mean_std(crop.pixels().map(move |p| p.0[c]));
    Ok([channel(0), channel(1), channel(2)])
}

/// Mean and population standard deviation.
fn mean_std(values: impl Iterator<Item = u8>) -> (f64, f64) {
    let (mut n, mut sum, mut sum_sq) = (0u64, 0f64, 0f64);
    for v in values {
        let v = v as f64;
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectClass;
    use image::Rgb;

    fn clump(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(ObjectClass::Clump, 0.9, x, y, w, h)
    }

    #[test]
    fn crop_region_rounds_halves_to_even() {
        // 7.5..12.5 -> 8..12, 8.0..12.0 stays
        let rect = crop_region(&clump(10.0, 10.0, 5.0, 4.0));
        assert_eq!(rect, CropRect { x: 8, y: 8, width: 4, height: 4 });

        // 6.5..11.5 -> 6..12
        let rect = crop_region(&clump(9.0, 9.0, 5.0, 5.0));
        assert_eq!(rect, CropRect { x: 6, y: 6, width: 6, height: 6 });
    }

    #[test]
    fn crop_region_is_not_clamped_to_the_image() {
        let edge = crop_region(&clump(2.0, 98.0, 10.0, 10.0));
        assert_eq!(edge, CropRect { x: -3, y: 93, width: 10, height: 10 });

        let degenerate = crop_region(&clump(5.0, 5.0, 0.0, 0.0));
        assert_eq!((degenerate.width, degenerate.height), (0, 0));
    }

    #[test]
    fn crop_clump_copies_pixels() {
        let mut image = RgbImage::new(10, 10);
        image.put_pixel(4, 4, Rgb([200, 100, 50]));
        let crop = crop_clump(&image, &clump(5.0, 5.0, 4.0, 4.0));
        assert_eq!(crop.dimensions(), (4, 4));
        assert_eq!(crop.get_pixel(1, 1).0, [200, 100, 50]);
    }

    #[test]
    fn crop_clump_pads_outside_pixels_with_black() {
        let image = RgbImage::from_pixel(100, 100, Rgb([90, 90, 90]));
        let crop = crop_clump(&image, &clump(2.0, 98.0, 10.0, 10.0));
        assert_eq!(crop.dimensions(), (10, 10));
        // x -3..7, y 93..103
        assert_eq!(crop.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(crop.get_pixel(3, 0).0, [90, 90, 90]);
        assert_eq!(crop.get_pixel(3, 6).0, [90, 90, 90]);
        assert_eq!(crop.get_pixel(3, 7).0, [0, 0, 0]);

        let outside = crop_clump(&image, &clump(500.0, 500.0, 10.0, 10.0));
        assert_eq!(outside.dimensions(), (10, 10));
        assert!(outside.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn full_channel_stats_on_uniform_crop() {
        let crop = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let f = extract_features(&crop, ChannelSampling::FullChannel).unwrap();
        assert_eq!((f.width, f.height), (3.0, 2.0));
        assert_eq!((f.avg_r, f.avg_g, f.avg_b), (10.0, 20.0, 30.0));
        assert_eq!((f.sd_r, f.sd_g, f.sd_b), (0.0, 0.0, 0.0));
    }

    #[test]
    fn legacy_sampling_reads_fixed_indices() {
        // 2x2 crop; row 1 = bottom row, column 1 = right column.
        let mut crop = RgbImage::new(2, 2);
        crop.put_pixel(0, 0, Rgb([0, 0, 0]));
        crop.put_pixel(1, 0, Rgb([6, 6, 6]));
        crop.put_pixel(0, 1, Rgb([2, 2, 2]));
        crop.put_pixel(1, 1, Rgb([4, 4, 4]));
        let f = extract_features(&crop, ChannelSampling::Legacy).unwrap();
        assert_eq!(f.avg_r, 3.0); // row 1: 2,2,2,4,4,4
        assert_eq!(f.sd_r, 1.0);
        assert_eq!(f.avg_g, 5.0); // column 1: 6,6,6,4,4,4
        assert_eq!(f.sd_g, 1.0);
        assert_eq!(f.avg_b, 3.0); // green everywhere: 0,6,2,4
    }

    #[test]
    fn degenerate_crops_are_errors() {
        let thin = RgbImage::new(1, 5);
        assert!(extract_features(&thin, ChannelSampling::Legacy).is_err());
        assert!(extract_features(&thin, ChannelSampling::FullChannel).is_ok());
        let empty = RgbImage::new(0, 0);
        assert!(extract_features(&empty, ChannelSampling::FullChannel).is_err());
    }

    #[test]
    fn row_matches_names() {
        let f = FeatureVector {
            width: 1.0,
            height: 2.0,
            avg_r: 3.0,
            sd_r: 4.0,
            avg_g: 5.0,
            sd_g: 6.0,
            avg_b: 7.0,
            sd_b: 8.0,
        };
        assert_eq!(f.to_row(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(FEATURE_NAMES[2], "avg_r");
    }
}
