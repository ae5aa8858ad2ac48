//! Hyperparameter sweep controller.
//!
//! The detection service is called exactly once per (image, overlap) pair with
//! no confidence floor. Every (seal, clump) confidence pair and every clump
//! threshold is then evaluated from that cached detection list:
//!
//! - clump crops and feature rows are computed at most once per
//!   (image, overlap) and only for clumps some threshold pair keeps;
//! - the regressor is called at most once per (image, overlap, clump
//!   confidence), with every kept clump in one batch;
//! - the source image is decoded at most once per image.
//!
//! Work is split into one job per (beach, image) and run on a bounded rayon
//! pool. Jobs return their own rows; outputs are merged once, in input order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{DetectorSettings, RegressorSettings, SweepRanges};
use crate::detect::{Detection, DetectionRequest, DetectionService, FixtureDetector, RoboflowClient};
use crate::estimate::{estimate_count, regress_clumps, ThresholdBoundary};
use crate::features::{crop_clump, extract_features, ChannelSampling, FeatureVector};
use crate::images::{Beach, FsImageStore, ImageEntry, ImageStore};
use crate::postprocess::partition_indices;
use crate::progress::Progress;
use crate::regress::{CountRegressor, ForestRegressor};

/// One point of the hyperparameter grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HyperparameterCombo {
    pub seal_confidence: u32,
    pub clump_confidence: u32,
    pub overlap: u32,
    pub clump_threshold: u32,
}

/// Estimated count for one image under one combo.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub beach: String,
    pub image_id: String,
    pub estimated_count: f64,
    #[serde(flatten)]
    pub combo: HyperparameterCombo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Detection,
    Regression,
}

/// A part of the grid that produced no rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub beach: String,
    pub image_id: String,
    pub overlap: u32,
    /// Set for regression failures.
    pub clump_confidence: Option<u32>,
    pub stage: FailureStage,
    pub message: String,
}

/// Service handles for one sweep.
///
/// Built once before the sweep and passed to every worker; dropping it
/// releases the clients.
pub struct SweepContext {
    pub detector: Arc<dyn DetectionService>,
    pub regressor: Arc<dyn CountRegressor>,
    pub images: Arc<dyn ImageStore>,
}

impl SweepContext {
    /// Open the configured detection and regression services.
    pub fn open(detector: &DetectorSettings, regressor: &RegressorSettings) -> Result<Self> {
        let detector: Arc<dyn DetectionService> = match detector {
            DetectorSettings::Roboflow(config) => Arc::new(RoboflowClient::new(config.clone())?),
            DetectorSettings::Fixture { path } => Arc::new(FixtureDetector::from_path(path)?),
        };
        let regressor: Arc<dyn CountRegressor> = match regressor {
            RegressorSettings::Forest { path } => Arc::new(ForestRegressor::from_path(path)?),
            #[cfg(feature = "backend-tract")]
            RegressorSettings::Onnx { path } => Arc::new(crate::regress::TractRegressor::new(path)?),
            #[cfg(not(feature = "backend-tract"))]
            RegressorSettings::Onnx { path } => {
                return Err(anyhow!(
                    "regressor {} needs the backend-tract feature",
                    path.display()
                ))
            }
        };
        Ok(Self {
            detector,
            regressor,
            images: Arc::new(FsImageStore),
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SweepSettings {
    pub ranges: SweepRanges,
    pub boundary: ThresholdBoundary,
    pub sampling: ChannelSampling,
    pub workers: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SweepOutcome {
    pub rows: Vec<ResultRow>,
    pub failures: Vec<SweepFailure>,
    /// Detection service calls made.
    pub detection_calls: usize,
}

#[derive(Default)]
struct JobOutput {
    rows: Vec<ResultRow>,
    failures: Vec<SweepFailure>,
    detection_calls: usize,
}

/// Flattened grid axes.
struct Grid {
    seal: Vec<u32>,
    clump: Vec<u32>,
    overlap: Vec<u32>,
    threshold: Vec<u32>,
}

impl Grid {
    fn new(ranges: &SweepRanges) -> Self {
        Self {
            seal: ranges.seal_confidence.values(),
            clump: ranges.clump_confidence.values(),
            overlap: ranges.overlap.values(),
            threshold: ranges.clump_threshold.values(),
        }
    }
}

/// Run the full grid over every beach.
pub fn run_sweep(
    ctx: &SweepContext,
    beaches: &[Beach],
    settings: &SweepSettings,
    progress: &dyn Progress,
) -> Result<SweepOutcome> {
    if settings.workers == 0 {
        return Err(anyhow!("sweep needs at least one worker"));
    }

    let mut jobs: Vec<(&str, &ImageEntry)> = Vec::new();
    for beach in beaches {
        if beach.images.is_empty() {
            log::warn!("beach {} has no images; excluded from tuning", beach.name);
            continue;
        }
        jobs.extend(beach.images.iter().map(|image| (beach.name.as_str(), image)));
    }

    let combinations = settings
        .ranges
        .combinations()
        .ok_or_else(|| anyhow!("hyperparameter grid is too large"))?;
    let grid = Grid::new(&settings.ranges);
    let total = (jobs.len() * grid.overlap.len()) as u64;
    log::info!(
        "{} combinations per image, {} images, {} detection calls ({} backend, {} regressor)",
        combinations,
        jobs.len(),
        total,
        ctx.detector.name(),
        ctx.regressor.name()
    );
    ctx.detector.warm_up().context("detection service warm-up failed")?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.workers)
        .build()
        .context("failed to build sweep worker pool")?;

    progress.start(total);
    let outputs: Vec<JobOutput> = pool.install(|| {
        jobs.par_iter()
            .map(|(beach, image)| run_image(ctx, &grid, settings, beach, image, progress))
            .collect()
    });
    progress.finish();

    let mut outcome = SweepOutcome::default();
    for output in outputs {
        outcome.rows.extend(output.rows);
        outcome.failures.extend(output.failures);
        outcome.detection_calls += output.detection_calls;
    }
    log::info!(
        "sweep finished: {} rows, {} failures",
        outcome.rows.len(),
        outcome.failures.len()
    );
    Ok(outcome)
}

/// Source image, decoded on first use. A decode failure is remembered.
struct LazySource<'a> {
    store: &'a dyn ImageStore,
    entry: &'a ImageEntry,
    loaded: Option<std::result::Result<RgbImage, String>>,
}

impl<'a> LazySource<'a> {
    fn new(store: &'a dyn ImageStore, entry: &'a ImageEntry) -> Self {
        Self {
            store,
            entry,
            loaded: None,
        }
    }

    fn get(&mut self) -> Result<&RgbImage> {
        let store = self.store;
        let entry = self.entry;
        match self
            .loaded
            .get_or_insert_with(|| store.load(entry).map_err(|e| format!("{e:#}")))
        {
            Ok(image) => Ok(image),
            Err(message) => Err(anyhow!("{}", message)),
        }
    }
}

fn run_image(
    ctx: &SweepContext,
    grid: &Grid,
    settings: &SweepSettings,
    beach: &str,
    image: &ImageEntry,
    progress: &dyn Progress,
) -> JobOutput {
    let mut out = JobOutput::default();
    let mut source = LazySource::new(ctx.images.as_ref(), image);

    for &overlap in &grid.overlap {
        out.detection_calls += 1;
        match ctx.detector.detect(image, DetectionRequest::unfiltered(overlap)) {
            Ok(detections) => {
                log::debug!(
                    "image {} overlap {}: {} detections",
                    image.id,
                    overlap,
                    detections.len()
                );
                evaluate_overlap(ctx, grid, settings, beach, image, overlap, &detections, &mut source, &mut out);
            }
            Err(e) => {
                log::warn!(
                    "detection failed for image {} at overlap {}: {:#}",
                    image.id,
                    overlap,
                    e
                );
                out.failures.push(SweepFailure {
                    beach: beach.to_string(),
                    image_id: image.id.clone(),
                    overlap,
                    clump_confidence: None,
                    stage: FailureStage::Detection,
                    message: format!("{e:#}"),
                });
            }
        }
        progress.advance();
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn evaluate_overlap(
    ctx: &SweepContext,
    grid: &Grid,
    settings: &SweepSettings,
    beach: &str,
    image: &ImageEntry,
    overlap: u32,
    detections: &[Detection],
    source: &mut LazySource<'_>,
    out: &mut JobOutput,
) {
    let mut features: HashMap<usize, FeatureVector> = HashMap::new();

    for &clump_conf in &grid.clump {
        // shared by every seal confidence and threshold at this clump confidence
        let mut clump_total: Option<std::result::Result<f64, String>> = None;
        let mut failure_recorded = false;

        for &seal_conf in &grid.seal {
            let kept = partition_indices(detections, seal_conf, clump_conf);
            for &threshold in &grid.threshold {
                let combo = HyperparameterCombo {
                    seal_confidence: seal_conf,
                    clump_confidence: clump_conf,
                    overlap,
                    clump_threshold: threshold,
                };
                let estimate = estimate_count(
                    kept.seals.len(),
                    kept.clumps.len(),
                    threshold,
                    settings.boundary,
                    || {
                        let total = clump_total.get_or_insert_with(|| {
                            clump_rows(detections, &kept.clumps, &mut features, &mut *source, settings.sampling)
                                .and_then(|rows| regress_clumps(&rows, ctx.regressor.as_ref()))
                                .map_err(|e| format!("{e:#}"))
                        });
                        total.clone().map_err(|message| anyhow!(message))
                    },
                );
                let estimated = match estimate {
                    Ok(count) => count,
                    Err(e) => {
                        if !failure_recorded {
                            let message = format!("{e:#}");
                            log::warn!(
                                "clump regression failed for image {} (overlap {}, clump confidence {}): {}",
                                image.id,
                                overlap,
                                clump_conf,
                                message
                            );
                            out.failures.push(SweepFailure {
                                beach: beach.to_string(),
                                image_id: image.id.clone(),
                                overlap,
                                clump_confidence: Some(clump_conf),
                                stage: FailureStage::Regression,
                                message,
                            });
                            failure_recorded = true;
                        }
                        continue;
                    }
                };
                out.rows.push(ResultRow {
                    beach: beach.to_string(),
                    image_id: image.id.clone(),
                    estimated_count: estimated,
                    combo,
                });
            }
        }
    }
}

/// Feature rows for the kept clumps, reusing rows computed at other thresholds.
fn clump_rows(
    detections: &[Detection],
    clumps: &[usize],
    cache: &mut HashMap<usize, FeatureVector>,
    source: &mut LazySource<'_>,
    sampling: ChannelSampling,
) -> Result<Vec<FeatureVector>> {
    let mut rows = Vec::with_capacity(clumps.len());
    for &index in clumps {
        if let Some(row) = cache.get(&index) {
            rows.push(*row);
            continue;
        }
        let crop = crop_clump(source.get()?, &detections[index]);
        let row = extract_features(&crop, sampling)
            .with_context(|| format!("clump {} of image {}", index, source.entry.id))?;
        cache.insert(index, row);
        rows.push(row);
    }
    Ok(rows)
}
