use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::RoboflowConfig;
use crate::estimate::{ThresholdBoundary, DEFAULT_BOUNDARY};
use crate::features::ChannelSampling;
use crate::images::{Beach, ImageEntry};
use crate::score::Statistic;

const DEFAULT_WORKERS: usize = 4;
const MAX_PERCENT: i64 = 100;
const MAX_COMBINATIONS: usize = 10_000_000;

/// Inclusive integer range with a positive step.
///
/// Only constructed through [`ParamRange::new`], so every instance is valid:
///
/// ```compile_fail
/// let range = seal_tune::ParamRange { min: 10, max: 0, step: 0 };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamRange {
    min: u32,
    max: u32,
    step: u32,
}

impl ParamRange {
    pub fn new(min: i64, max: i64, step: i64) -> Result<Self> {
        if min < 0 {
            return Err(anyhow!("range minimum {} must not be negative", min));
        }
        if min > max {
            return Err(anyhow!("range minimum {} exceeds maximum {}", min, max));
        }
        if step <= 0 {
            return Err(anyhow!("range step {} must be positive", step));
        }
        let to_u32 = |v: i64| u32::try_from(v).map_err(|_| anyhow!("range bound {} is too large", v));
        Ok(Self {
            min: to_u32(min)?,
            max: to_u32(max)?,
            step: to_u32(step)?,
        })
    }

    /// Single-value range.
    pub fn single(value: u32) -> Self {
        Self {
            min: value,
            max: value,
            step: 1,
        }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    /// Values `min, min + step, ..` up to and including `max` when reachable.
    pub fn values(&self) -> Vec<u32> {
        (self.min..=self.max).step_by(self.step as usize).collect()
    }

    pub fn len(&self) -> usize {
        ((self.max - self.min) / self.step) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// The four swept hyperparameter ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepRanges {
    pub seal_confidence: ParamRange,
    pub clump_confidence: ParamRange,
    pub overlap: ParamRange,
    pub clump_threshold: ParamRange,
}

impl SweepRanges {
    /// Hyperparameter combinations evaluated for every image, or `None` if
    /// the count does not fit in `usize`.
    pub fn combinations(&self) -> Option<usize> {
        self.seal_confidence
            .len()
            .checked_mul(self.clump_confidence.len())?
            .checked_mul(self.overlap.len())?
            .checked_mul(self.clump_threshold.len())
    }
}

#[derive(Clone, Debug)]
pub enum DetectorSettings {
    Roboflow(RoboflowConfig),
    Fixture { path: PathBuf },
}

#[derive(Clone, Debug)]
pub enum RegressorSettings {
    Forest { path: PathBuf },
    Onnx { path: PathBuf },
}

#[derive(Clone, Debug)]
pub enum BeachSource {
    Dir { name: String, dir: PathBuf },
    Images { name: String, images: Vec<PathBuf> },
}

impl BeachSource {
    pub fn name(&self) -> &str {
        match self {
            BeachSource::Dir { name, .. } | BeachSource::Images { name, .. } => name,
        }
    }

    pub fn resolve(&self) -> Result<Beach> {
        match self {
            BeachSource::Dir { name, dir } => Beach::from_dir(name, dir),
            BeachSource::Images { name, images } => {
                let entries = images
                    .iter()
                    .map(|p| ImageEntry::from_path(p.clone()))
                    .collect::<Result<Vec<_>>>()?;
                Beach::new(name, entries)
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TuningConfigFile {
    ranges: Option<RangesFile>,
    beaches: Option<Vec<BeachFile>>,
    ground_truth: Option<PathBuf>,
    statistic: Option<String>,
    write_results: Option<PathBuf>,
    summary: Option<PathBuf>,
    workers: Option<usize>,
    boundary: Option<ThresholdBoundary>,
    sampling: Option<ChannelSampling>,
    detector: Option<DetectorFile>,
    regressor: Option<RegressorFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RangesFile {
    seal_confidence: Option<RangeFile>,
    clump_confidence: Option<RangeFile>,
    overlap: Option<RangeFile>,
    clump_threshold: Option<RangeFile>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct RangeFile {
    min: i64,
    max: i64,
    #[serde(default = "default_step")]
    step: i64,
}

fn default_step() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct BeachFile {
    name: String,
    dir: Option<PathBuf>,
    images: Option<Vec<PathBuf>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DetectorFile {
    Roboflow {
        endpoint: Option<String>,
        project: String,
        version: u32,
        api_key: Option<String>,
        timeout_secs: Option<u64>,
    },
    Fixture {
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RegressorFile {
    Forest { path: PathBuf },
    Onnx { path: PathBuf },
}

/// Validated configuration for one tuning run.
#[derive(Debug, Clone)]
pub struct TuningConfig {
    pub ranges: SweepRanges,
    pub beaches: Vec<BeachSource>,
    pub ground_truth: Option<PathBuf>,
    pub statistic: Statistic,
    /// Full scored table destination (JSON Lines), when requested.
    pub write_results: Option<PathBuf>,
    /// Best-combo summary destination (JSON), when requested.
    pub summary: Option<PathBuf>,
    pub workers: usize,
    pub boundary: ThresholdBoundary,
    pub sampling: ChannelSampling,
    pub detector: Option<DetectorSettings>,
    pub regressor: Option<RegressorSettings>,
}

impl TuningConfig {
    /// Load from `path`, or from `SEAL_TUNE_CONFIG` when no path is given,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SEAL_TUNE_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => TuningConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TuningConfigFile) -> Result<Self> {
        let ranges = file.ranges.unwrap_or_default();
        let range = |name: &str, r: Option<RangeFile>| -> Result<ParamRange> {
            let r = r.ok_or_else(|| anyhow!("ranges.{} must be configured", name))?;
            ParamRange::new(r.min, r.max, r.step).with_context(|| format!("invalid ranges.{}", name))
        };
        let ranges = SweepRanges {
            seal_confidence: range("seal_confidence", ranges.seal_confidence)?,
            clump_confidence: range("clump_confidence", ranges.clump_confidence)?,
            overlap: range("overlap", ranges.overlap)?,
            clump_threshold: range("clump_threshold", ranges.clump_threshold)?,
        };

        let beaches = file
            .beaches
            .unwrap_or_default()
            .into_iter()
            .map(|b| match (b.dir, b.images) {
                (Some(dir), None) => Ok(BeachSource::Dir { name: b.name, dir }),
                (None, Some(images)) => Ok(BeachSource::Images {
                    name: b.name,
                    images,
                }),
                _ => Err(anyhow!(
                    "beach '{}' must set exactly one of dir or images",
                    b.name
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        let statistic = match file.statistic.as_deref() {
            Some(s) => s.parse()?,
            None => Statistic::default(),
        };

        let detector = file.detector.map(|d| match d {
            DetectorFile::Roboflow {
                endpoint,
                project,
                version,
                api_key,
                timeout_secs,
            } => {
                let defaults = RoboflowConfig::default();
                DetectorSettings::Roboflow(RoboflowConfig {
                    endpoint: endpoint.unwrap_or(defaults.endpoint),
                    project,
                    version,
                    api_key: api_key.unwrap_or_default(),
                    timeout: timeout_secs.map(Duration::from_secs).unwrap_or(defaults.timeout),
                })
            }
            DetectorFile::Fixture { path } => DetectorSettings::Fixture { path },
        });
        let regressor = file.regressor.map(|r| match r {
            RegressorFile::Forest { path } => RegressorSettings::Forest { path },
            RegressorFile::Onnx { path } => RegressorSettings::Onnx { path },
        });

        Ok(Self {
            ranges,
            beaches,
            ground_truth: file.ground_truth,
            statistic,
            write_results: file.write_results,
            summary: file.summary,
            workers: file.workers.unwrap_or(DEFAULT_WORKERS),
            boundary: file.boundary.unwrap_or(DEFAULT_BOUNDARY),
            sampling: file.sampling.unwrap_or_default(),
            detector,
            regressor,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SEAL_TUNE_GROUND_TRUTH") {
            if !path.trim().is_empty() {
                self.ground_truth = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SEAL_TUNE_WRITE_RESULTS") {
            if !path.trim().is_empty() {
                self.write_results = Some(PathBuf::from(path));
            }
        }
        if let Ok(statistic) = std::env::var("SEAL_TUNE_STATISTIC") {
            if !statistic.trim().is_empty() {
                self.statistic = statistic.parse()?;
            }
        }
        if let Ok(workers) = std::env::var("SEAL_TUNE_WORKERS") {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("SEAL_TUNE_WORKERS must be a positive integer"))?;
        }
        if let Ok(key) = std::env::var("ROBOFLOW_API_KEY") {
            if let Some(DetectorSettings::Roboflow(rf)) = &mut self.detector {
                if rf.api_key.trim().is_empty() && !key.trim().is_empty() {
                    rf.api_key = key.trim().to_string();
                }
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        for (name, range) in [
            ("seal_confidence", self.ranges.seal_confidence),
            ("clump_confidence", self.ranges.clump_confidence),
            ("overlap", self.ranges.overlap),
        ] {
            if range.max() as i64 > MAX_PERCENT {
                return Err(anyhow!(
                    "ranges.{} maximum {} exceeds {}",
                    name,
                    range.max(),
                    MAX_PERCENT
                ));
            }
        }
        match self.ranges.combinations() {
            Some(n) if n <= MAX_COMBINATIONS => {}
            _ => {
                return Err(anyhow!(
                    "hyperparameter grid exceeds {} combinations per image",
                    MAX_COMBINATIONS
                ))
            }
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be greater than zero"));
        }
        let mut names = std::collections::HashSet::new();
        for beach in &self.beaches {
            if beach.name().trim().is_empty() {
                return Err(anyhow!("beach names must not be empty"));
            }
            if !names.insert(beach.name().to_string()) {
                return Err(anyhow!("beach '{}' is configured twice", beach.name()));
            }
        }
        Ok(())
    }

    /// Resolve every configured beach into its image list.
    pub fn resolve_beaches(&self) -> Result<Vec<Beach>> {
        self.beaches.iter().map(BeachSource::resolve).collect()
    }
}

fn read_config_file(path: &Path) -> Result<TuningConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
