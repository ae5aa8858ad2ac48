#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use super::CountRegressor;
use crate::features::{FeatureVector, FEATURE_COUNT};

/// Tract-based backend for an ONNX clump-count regressor.
///
/// The model takes a `[N, 8]` f32 feature table (column order of
/// `FEATURE_NAMES`) and produces `N` estimates. The exported model must keep
/// the batch dimension symbolic so one call covers every clump of a sweep step.
pub struct TractRegressor {
    model: TypedRunnableModel<TypedModel>,
}

impl TractRegressor {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model })
    }

    fn build_input(&self, features: &[FeatureVector]) -> Tensor {
        let input = tract_ndarray::Array2::from_shape_fn((features.len(), FEATURE_COUNT), |(row, col)| {
            features[row].to_row()[col] as f32
        });
        input.into_tensor()
    }

    fn extract_predictions(&self, outputs: TVec<TValue>, expected: usize) -> Result<Vec<f64>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        if values.len() != expected {
            return Err(anyhow!(
                "model produced {} values for {} rows",
                values.len(),
                expected
            ));
        }
        Ok(values.iter().map(|v| *v as f64).collect())
    }
}

impl CountRegressor for TractRegressor {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&self, features: &[FeatureVector]) -> Result<Vec<f64>> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let input = self.build_input(features);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_predictions(outputs, features.len())
    }
}
