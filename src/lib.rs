//! Seal census hyperparameter tuning.
//!
//! This crate sweeps the post-processing hyperparameters of an aerial seal
//! counting pipeline and reports, per beach, the combination whose estimated
//! counts best match hand counts.
//!
//! # Pipeline
//!
//! For every image and every point of the hyperparameter grid:
//!
//! 1. Raw detections come from a detection service (hosted or replayed).
//! 2. Detections are filtered by confidence; seals inside kept clumps are dropped.
//! 3. The count is the seal count, plus a regression estimate for clumps once
//!    the image has enough of them.
//! 4. Estimates are joined with ground truth and reduced to one error per
//!    (beach, combo); the minimum wins.
//!
//! # Module Structure
//!
//! - `geometry`: axis-aligned boxes and the intersection test
//! - `detect`: detection records and detection service backends
//! - `images`: beach image discovery and decoding
//! - `features`: clump crops and colour statistics
//! - `postprocess`: confidence filtering and seal/clump deduplication
//! - `regress`: clump count regressors
//! - `estimate`: two-branch count estimation
//! - `sweep`: grid sweep with cached detection and regression calls
//! - `progress`: sweep progress reporting
//! - `score`: ground-truth join, aggregation and selection
//! - `table`: ground-truth and result table files
//! - `config`: validated tuning configuration

pub mod config;
pub mod detect;
pub mod estimate;
pub mod features;
pub mod geometry;
pub mod images;
pub mod postprocess;
pub mod progress;
pub mod regress;
pub mod score;
pub mod sweep;
pub mod table;

pub use config::{ParamRange, SweepRanges, TuningConfig};
pub use detect::{Detection, DetectionRequest, DetectionService, ObjectClass};
pub use estimate::{estimate_count, ThresholdBoundary, DEFAULT_BOUNDARY};
pub use features::{extract_features, ChannelSampling, FeatureVector};
pub use geometry::{intersects, BoundingBox};
pub use images::{Beach, FsImageStore, ImageEntry, ImageStore};
pub use postprocess::{partition_detections, Partition};
pub use progress::{LogProgress, NoProgress, Progress};
pub use regress::{CountRegressor, ForestRegressor};
pub use score::{aggregate, score_rows, select_best, BestCombos, ComboScore, GroundTruth, Statistic};
pub use sweep::{run_sweep, HyperparameterCombo, ResultRow, SweepContext, SweepOutcome, SweepSettings};
