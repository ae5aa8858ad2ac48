//! Ground-truth join, per-combo error aggregation and per-beach selection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::sweep::{HyperparameterCombo, ResultRow};

/// Reduction applied to a combo's per-image errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    #[default]
    Median,
    Mean,
}

impl FromStr for Statistic {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "median" => Ok(Statistic::Median),
            "mean" => Ok(Statistic::Mean),
            other => Err(anyhow!("unknown statistic '{}'; expected median or mean", other)),
        }
    }
}

impl Statistic {
    /// Reduce a non-empty set of errors.
    pub fn reduce(self, values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Statistic::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Statistic::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    Some((values[mid - 1] + values[mid]) / 2.0)
                } else {
                    Some(values[mid])
                }
            }
        }
    }
}

/// Ground-truth seal counts keyed by image id.
#[derive(Clone, Debug, Default)]
pub struct GroundTruth {
    counts: HashMap<String, u32>,
    /// Ids present in the table whose count could not be used.
    unusable: BTreeSet<String>,
}

impl GroundTruth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one row. Image ids must be unique.
    pub fn insert(&mut self, image_id: &str, true_count: u32) -> Result<()> {
        if self.contains(image_id) {
            return Err(anyhow!("ground truth lists image '{}' more than once", image_id));
        }
        self.counts.insert(image_id.to_string(), true_count);
        Ok(())
    }

    /// Record an id whose count is missing or non-numeric.
    pub fn mark_unusable(&mut self, image_id: &str) -> Result<()> {
        if self.contains(image_id) {
            return Err(anyhow!("ground truth lists image '{}' more than once", image_id));
        }
        self.unusable.insert(image_id.to_string());
        Ok(())
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.counts.contains_key(image_id) || self.unusable.contains(image_id)
    }

    pub fn get(&self, image_id: &str) -> Option<u32> {
        self.counts.get(image_id).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Relative error of one row, or why it has none.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeError {
    Defined(f64),
    /// True count is zero; the ratio is undefined.
    ZeroTruth,
    /// No usable ground truth for the image.
    NoTruth,
}

impl RelativeError {
    pub fn compute(estimated: f64, true_count: u32) -> Self {
        if true_count == 0 {
            return RelativeError::ZeroTruth;
        }
        let truth = true_count as f64;
        RelativeError::Defined((estimated - truth).abs() / truth)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            RelativeError::Defined(v) => Some(*v),
            _ => None,
        }
    }
}

/// A result row joined with its ground truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    #[serde(flatten)]
    pub row: ResultRow,
    pub true_count: Option<u32>,
    pub error: RelativeError,
}

/// Left-join results with ground truth.
///
/// Every result row is kept for the audit table; rows without usable ground
/// truth carry `NoTruth` and are ignored by aggregation. Each unmatched or
/// zero-truth image is logged once.
pub fn score_rows(rows: Vec<ResultRow>, truth: &GroundTruth) -> Vec<ScoredRow> {
    let mut unmatched = BTreeSet::new();
    let mut zero = BTreeSet::new();
    let scored: Vec<ScoredRow> = rows
        .into_iter()
        .map(|row| {
            let true_count = truth.get(&row.image_id);
            let error = match true_count {
                Some(t) => RelativeError::compute(row.estimated_count, t),
                None => RelativeError::NoTruth,
            };
            match error {
                RelativeError::NoTruth => {
                    unmatched.insert(row.image_id.clone());
                }
                RelativeError::ZeroTruth => {
                    zero.insert(row.image_id.clone());
                }
                RelativeError::Defined(_) => {}
            }
            ScoredRow {
                row,
                true_count,
                error,
            }
        })
        .collect();
    for id in &unmatched {
        log::warn!("no usable ground truth for image {}; excluded from scoring", id);
    }
    for id in &zero {
        log::warn!("ground truth for image {} is 0; relative error undefined", id);
    }
    scored
}

/// Aggregated error of one combo on one beach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComboScore {
    pub beach: String,
    pub combo: HyperparameterCombo,
    pub score: f64,
    /// Rows that contributed a defined error.
    pub scored_images: usize,
    /// Rows excluded because the error was undefined or unmatched.
    pub excluded_images: usize,
}

/// Group scored rows by (beach, combo) and reduce their errors.
///
/// Groups without a single defined error produce no score.
pub fn aggregate(rows: &[ScoredRow], statistic: Statistic) -> Vec<ComboScore> {
    let mut groups: BTreeMap<(&str, HyperparameterCombo), (Vec<f64>, usize)> = BTreeMap::new();
    for scored in rows {
        let entry = groups
            .entry((scored.row.beach.as_str(), scored.row.combo))
            .or_default();
        match scored.error.value() {
            Some(v) => entry.0.push(v),
            None => entry.1 += 1,
        }
    }
    groups
        .into_iter()
        .filter_map(|((beach, combo), (mut errors, excluded))| {
            let scored_images = errors.len();
            statistic.reduce(&mut errors).map(|score| ComboScore {
                beach: beach.to_string(),
                combo,
                score,
                scored_images,
                excluded_images: excluded,
            })
        })
        .collect()
}

/// Minimizing combo(s) for one beach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestCombos {
    pub score: f64,
    pub combos: Vec<HyperparameterCombo>,
}

/// Per beach, every combo whose score equals the beach minimum.
pub fn select_best(scores: &[ComboScore]) -> BTreeMap<String, BestCombos> {
    let mut best: BTreeMap<String, BestCombos> = BTreeMap::new();
    for s in scores {
        match best.get_mut(&s.beach) {
            None => {
                best.insert(
                    s.beach.clone(),
                    BestCombos {
                        score: s.score,
                        combos: vec![s.combo],
                    },
                );
            }
            Some(current) if s.score < current.score => {
                current.score = s.score;
                current.combos = vec![s.combo];
            }
            Some(current) if s.score == current.score => current.combos.push(s.combo),
            Some(_) => {}
        }
    }
    best
}
