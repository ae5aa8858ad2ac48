//! seal_tune - sweep post-processing hyperparameters against hand counts
//!
//! Runs every image of every configured beach through the detection service
//! once per overlap value, evaluates the whole confidence and clump-threshold
//! grid from those detections, and prints the best combination per beach.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use seal_tune::{
    aggregate, run_sweep, score_rows, select_best, table, Statistic, SweepContext, SweepSettings,
    TuningConfig,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "seal_tune",
    about = "Tune seal/clump post-processing hyperparameters per beach"
)]
struct Args {
    /// Tuning config (JSON or TOML)
    #[arg(long, env = "SEAL_TUNE_CONFIG", value_name = "PATH")]
    config: PathBuf,

    /// Ground-truth CSV (image id, true count)
    #[arg(long, value_name = "PATH")]
    ground_truth: Option<PathBuf>,

    /// Write the full scored table as JSON Lines
    #[arg(long, value_name = "PATH")]
    write_results: Option<PathBuf>,

    /// Write the best combinations and per-combo scores as JSON
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,

    /// Error statistic (median|mean)
    #[arg(long)]
    statistic: Option<Statistic>,

    /// Sweep worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let mut cfg = TuningConfig::load(Some(&args.config))?;
    if let Some(path) = args.ground_truth {
        cfg.ground_truth = Some(path);
    }
    if let Some(path) = args.write_results {
        cfg.write_results = Some(path);
    }
    if let Some(path) = args.summary {
        cfg.summary = Some(path);
    }
    if let Some(statistic) = args.statistic {
        cfg.statistic = statistic;
    }
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err(anyhow!("--workers must be greater than zero"));
        }
        cfg.workers = workers;
    }

    let ground_truth_path = cfg
        .ground_truth
        .clone()
        .ok_or_else(|| anyhow!("ground truth path must be configured"))?;
    let detector = cfg
        .detector
        .as_ref()
        .ok_or_else(|| anyhow!("detector must be configured"))?;
    let regressor = cfg
        .regressor
        .as_ref()
        .ok_or_else(|| anyhow!("regressor must be configured"))?;

    let (beaches, truth) = {
        let _stage = ui.stage("Load beaches and ground truth");
        let beaches = cfg.resolve_beaches()?;
        let truth = table::read_ground_truth(&ground_truth_path)?;
        (beaches, truth)
    };
    log::info!(
        "{} beaches, {} images, {} ground-truth counts",
        beaches.len(),
        beaches.iter().map(|b| b.images.len()).sum::<usize>(),
        truth.len()
    );

    let ctx = {
        let _stage = ui.stage("Open detection and regression services");
        SweepContext::open(detector, regressor)?
    };

    let settings = SweepSettings {
        ranges: cfg.ranges,
        boundary: cfg.boundary,
        sampling: cfg.sampling,
        workers: cfg.workers,
    };
    let progress = ui.sweep_progress();
    let outcome = run_sweep(&ctx, &beaches, &settings, progress.as_ref())
        .context("hyperparameter sweep failed")?;
    drop(ctx);

    for failure in &outcome.failures {
        log::warn!(
            "{:?} failure: beach {} image {} overlap {}: {}",
            failure.stage,
            failure.beach,
            failure.image_id,
            failure.overlap,
            failure.message
        );
    }

    let scored = {
        let _stage = ui.stage("Score results");
        score_rows(outcome.rows, &truth)
    };
    let scores = aggregate(&scored, cfg.statistic);
    let best = select_best(&scores);

    if let Some(path) = &cfg.write_results {
        table::write_results(path, &scored)?;
    }
    if let Some(path) = &cfg.summary {
        table::write_summary(path, &best, &scores)?;
    }

    for beach in &beaches {
        match best.get(&beach.name) {
            Some(b) => {
                for combo in &b.combos {
                    println!(
                        "{}: seal_confidence={} clump_confidence={} overlap={} clump_threshold={} {:?}_error={:.4}",
                        beach.name,
                        combo.seal_confidence,
                        combo.clump_confidence,
                        combo.overlap,
                        combo.clump_threshold,
                        cfg.statistic,
                        b.score
                    );
                }
            }
            None => println!("{}: no scored combination", beach.name),
        }
    }
    Ok(())
}
