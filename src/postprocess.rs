//! Confidence filtering and seal/clump deduplication for one image.

use crate::geometry::intersects;
use crate::Detection;

/// Detections that survive one (seal, clump) confidence pair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    /// Seals above threshold that do not overlap any kept clump.
    pub seals: Vec<Detection>,
    /// Clumps above threshold.
    pub clumps: Vec<Detection>,
}

/// Split raw detections into kept seals and kept clumps.
///
/// Thresholds are percentages; a detection is kept when its confidence is
/// strictly above the threshold. A seal that intersects a kept clump is
/// already counted through that clump and is dropped.
pub fn partition_detections(detections: &[Detection], seal_conf: u32, clump_conf: u32) -> Partition {
    let kept = partition_indices(detections, seal_conf, clump_conf);
    let pick = |indices: &[usize]| -> Vec<Detection> {
        indices.iter().map(|&i| detections[i].clone()).collect()
    };
    Partition {
        seals: pick(&kept.seals),
        clumps: pick(&kept.clumps),
    }
}

/// Positions of kept detections in the input slice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionIndices {
    pub seals: Vec<usize>,
    pub clumps: Vec<usize>,
}

/// Same rule as [`partition_detections`], returning input positions so callers
/// can reuse per-detection work across threshold pairs.
pub fn partition_indices(detections: &[Detection], seal_conf: u32, clump_conf: u32) -> PartitionIndices {
    let clumps: Vec<usize> = detections
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_clump() && d.exceeds(clump_conf))
        .map(|(i, _)| i)
        .collect();
    let seals = detections
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_seal() && d.exceeds(seal_conf))
        .filter(|(_, seal)| !clumps.iter().any(|&c| intersects(seal, &detections[c])))
        .map(|(i, _)| i)
        .collect();
    PartitionIndices { seals, clumps }
}
