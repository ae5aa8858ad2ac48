//! Two-branch count estimation: direct seal count, or seals plus a regression
//! estimate for clumps once an image has enough of them.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;
use crate::regress::{predict_checked, CountRegressor};

/// Which side of the clump threshold the boundary value falls on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdBoundary {
    /// `clumps >= threshold` uses regression.
    #[default]
    Inclusive,
    /// `clumps > threshold` uses regression.
    Exclusive,
}

pub const DEFAULT_BOUNDARY: ThresholdBoundary = ThresholdBoundary::Inclusive;

impl ThresholdBoundary {
    /// True when an image with `clump_count` clumps takes the regression branch.
    pub fn uses_regression(self, clump_count: usize, clump_threshold: u32) -> bool {
        let threshold = clump_threshold as usize;
        match self {
            ThresholdBoundary::Inclusive => clump_count >= threshold,
            ThresholdBoundary::Exclusive => clump_count > threshold,
        }
    }
}

/// Sum of per-clump estimates, from a single regressor call.
///
/// No call is made for an empty table.
pub fn regress_clumps(features: &[FeatureVector], regressor: &dyn CountRegressor) -> Result<f64> {
    if features.is_empty() {
        return Ok(0.0);
    }
    Ok(predict_checked(regressor, features)?.iter().sum())
}

/// Estimate one image's seal count for one clump threshold.
///
/// `clump_total` yields the regression estimate for the kept clumps,
/// typically [`regress_clumps`] over their feature rows. It is invoked only
/// when the regression branch is selected and at least one clump is kept, so
/// callers can defer cropping and model calls until then.
pub fn estimate_count<F>(
    seal_count: usize,
    clump_count: usize,
    clump_threshold: u32,
    boundary: ThresholdBoundary,
    clump_total: F,
) -> Result<f64>
where
    F: FnOnce() -> Result<f64>,
{
    let direct = seal_count as f64;
    if clump_count == 0 || !boundary.uses_regression(clump_count, clump_threshold) {
        return Ok(direct);
    }
    Ok(direct + clump_total()?)
}
