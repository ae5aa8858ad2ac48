use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use super::CountRegressor;
use crate::features::{FeatureVector, FEATURE_COUNT};

const LEAF: i64 = -1;

/// One decision tree in the flat array layout scikit-learn exposes as `tree_`.
///
/// Node `i` is a leaf when `children_left[i] == -1`; otherwise the sample goes
/// left when `x[feature[i]] <= threshold[i]`.
#[derive(Clone, Debug, Deserialize)]
pub struct RegressionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl RegressionTree {
    fn validate(&self, index: usize) -> Result<()> {
        let n = self.children_left.len();
        if n == 0 {
            return Err(anyhow!("tree {} has no nodes", index));
        }
        if self.children_right.len() != n
            || self.feature.len() != n
            || self.threshold.len() != n
            || self.value.len() != n
        {
            return Err(anyhow!("tree {} has arrays of different lengths", index));
        }
        for node in 0..n {
            let left = self.children_left[node];
            if left == LEAF {
                continue;
            }
            let right = self.children_right[node];
            let in_range = |child: i64| child > node as i64 && (child as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(anyhow!("tree {} node {} has an invalid child", index, node));
            }
            let feature = self.feature[node];
            if feature < 0 || feature as usize >= FEATURE_COUNT {
                return Err(anyhow!(
                    "tree {} node {} splits on unknown feature {}",
                    index,
                    node,
                    feature
                ));
            }
        }
        Ok(())
    }

    fn evaluate(&self, row: &[f64; FEATURE_COUNT]) -> f64 {
        // children always point forward (checked on load), so this terminates
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            let feature = self.feature[node] as usize;
            // thresholds were fit on float32 inputs
            let x = row[feature] as f32 as f64;
            node = if x <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        self.value[node]
    }
}

/// Averaging tree ensemble (random forest regressor) exported to JSON.
#[derive(Clone, Debug, Deserialize)]
pub struct ForestRegressor {
    trees: Vec<RegressionTree>,
}

impl ForestRegressor {
    pub fn new(trees: Vec<RegressionTree>) -> Result<Self> {
        if trees.is_empty() {
            return Err(anyhow!("forest has no trees"));
        }
        for (i, tree) in trees.iter().enumerate() {
            tree.validate(i)?;
        }
        Ok(Self { trees })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read forest model {}", path.display()))?;
        let parsed: ForestRegressor = serde_json::from_str(&raw)
            .with_context(|| format!("invalid forest model {}", path.display()))?;
        Self::new(parsed.trees)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl CountRegressor for ForestRegressor {
    fn name(&self) -> &'static str {
        "forest"
    }

    fn predict(&self, features: &[FeatureVector]) -> Result<Vec<f64>> {
        let n = self.trees.len() as f64;
        Ok(features
            .iter()
            .map(|f| {
                let row = f.to_row();
                self.trees.iter().map(|t| t.evaluate(&row)).sum::<f64>() / n
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: i64, threshold: f64, left: f64, right: f64) -> RegressionTree {
        RegressionTree {
            children_left: vec![1, -1, -1],
            children_right: vec![2, -1, -1],
            feature: vec![feature, -2, -2],
            threshold: vec![threshold, -2.0, -2.0],
            value: vec![0.0, left, right],
        }
    }

    fn features(width: f64) -> FeatureVector {
        FeatureVector {
            width,
            height: 20.0,
            avg_r: 0.0,
            sd_r: 0.0,
            avg_g: 0.0,
            sd_g: 0.0,
            avg_b: 0.0,
            sd_b: 0.0,
        }
    }

    #[test]
    fn averages_tree_outputs() {
        let forest = ForestRegressor::new(vec![stump(0, 50.0, 2.0, 6.0), stump(1, 10.0, 1.0, 3.0)]).unwrap();
        let out = forest.predict(&[features(40.0), features(80.0)]).unwrap();
        // width 40 -> 2 and 3; width 80 -> 6 and 3
        assert_eq!(out, vec![2.5, 4.5]);
    }

    #[test]
    fn split_goes_left_on_equality() {
        let forest = ForestRegressor::new(vec![stump(0, 50.0, 2.0, 6.0)]).unwrap();
        assert_eq!(forest.predict(&[features(50.0)]).unwrap(), vec![2.0]);
    }

    #[test]
    fn compares_at_float32_precision() {
        // 0.7 rounds down to 0.699999988 in f32, which is the stored threshold
        let threshold = 0.7f32 as f64;
        assert!(0.7 > threshold);
        let forest = ForestRegressor::new(vec![stump(0, threshold, 2.0, 6.0)]).unwrap();
        assert_eq!(forest.predict(&[features(0.7)]).unwrap(), vec![2.0]);
    }

    #[test]
    fn rejects_malformed_trees() {
        let mut cyclic = stump(0, 1.0, 1.0, 1.0);
        cyclic.children_left[0] = 0;
        assert!(ForestRegressor::new(vec![cyclic]).is_err());

        let mut bad_feature = stump(0, 1.0, 1.0, 1.0);
        bad_feature.feature[0] = 8;
        assert!(ForestRegressor::new(vec![bad_feature]).is_err());

        assert!(ForestRegressor::new(vec![]).is_err());
    }

    #[test]
    fn loads_json_export() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = r#"{"trees": [{
            "children_left": [1, -1, -1],
            "children_right": [2, -1, -1],
            "feature": [0, -2, -2],
            "threshold": [50.0, -2.0, -2.0],
            "value": [4.0, 2.0, 6.0]
        }]}"#;
        std::io::Write::write_all(&mut file, json.as_bytes()).unwrap();
        let forest = ForestRegressor::from_path(file.path()).unwrap();
        assert_eq!(forest.tree_count(), 1);
        assert_eq!(forest.predict(&[features(60.0)]).unwrap(), vec![6.0]);
    }
}
