//! rescore - recompute per-beach selection from a saved result table

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use seal_tune::{aggregate, select_best, table, Statistic};

#[path = "../ui.rs"]
#[allow(dead_code)]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "rescore", about = "Re-aggregate a saved seal_tune result table")]
struct Args {
    /// JSON Lines table written by seal_tune --write-results
    #[arg(long, value_name = "PATH")]
    results: PathBuf,

    /// Error statistic (median|mean)
    #[arg(long, default_value = "median")]
    statistic: Statistic,

    /// Write the best combinations and per-combo scores as JSON
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let rows = {
        let _stage = ui.stage("Load result table");
        table::read_results(&args.results)?
    };
    let scores = aggregate(&rows, args.statistic);
    let best = select_best(&scores);

    if let Some(path) = &args.summary {
        table::write_summary(path, &best, &scores)?;
    }
    for (beach, b) in &best {
        for combo in &b.combos {
            println!(
                "{}: seal_confidence={} clump_confidence={} overlap={} clump_threshold={} {:?}_error={:.4}",
                beach,
                combo.seal_confidence,
                combo.clump_confidence,
                combo.overlap,
                combo.clump_threshold,
                args.statistic,
                b.score
            );
        }
    }
    Ok(())
}
