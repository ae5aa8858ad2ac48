//! Clump-to-seal-count regression backends.

use anyhow::{anyhow, Result};

use crate::features::FeatureVector;

mod forest;
#[cfg(feature = "backend-tract")]
mod tract;

pub use forest::{ForestRegressor, RegressionTree};
#[cfg(feature = "backend-tract")]
pub use tract::TractRegressor;

/// Regression service boundary.
///
/// Receives one feature row per clump and answers one estimated seal count
/// per row, in the same order.
pub trait CountRegressor: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict(&self, features: &[FeatureVector]) -> Result<Vec<f64>>;
}

/// Call the regressor and check the shape and values of its answer.
pub fn predict_checked(regressor: &dyn CountRegressor, features: &[FeatureVector]) -> Result<Vec<f64>> {
    let predictions = regressor.predict(features)?;
    if predictions.len() != features.len() {
        return Err(anyhow!(
            "regressor {} returned {} predictions for {} rows",
            regressor.name(),
            predictions.len(),
            features.len()
        ));
    }
    if let Some(bad) = predictions.iter().find(|p| !p.is_finite()) {
        return Err(anyhow!(
            "regressor {} returned non-finite prediction {}",
            regressor.name(),
            bad
        ));
    }
    Ok(predictions)
}
