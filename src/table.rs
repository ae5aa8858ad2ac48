//! Ground-truth CSV input, scored result table (JSON Lines) and summary output.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::score::{BestCombos, ComboScore, GroundTruth, ScoredRow};

/// Read a two-column ground-truth CSV with a header row.
pub fn read_ground_truth(path: &Path) -> Result<GroundTruth> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read ground truth {}", path.display()))?;
    parse_ground_truth(&raw).with_context(|| format!("invalid ground truth {}", path.display()))
}

/// Parse ground-truth CSV text.
///
/// The first non-empty line is the header. Each later line must have exactly
/// two columns: image id and true count. A non-numeric count marks the image
/// as unusable rather than failing the whole table.
pub fn parse_ground_truth(raw: &str) -> Result<GroundTruth> {
    let mut truth = GroundTruth::new();
    let mut lines = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| anyhow!("ground truth has no header row"))?;
    if split_row(header).len() != 2 {
        return Err(anyhow!("ground truth header must have exactly two columns"));
    }

    for (index, line) in lines {
        let line_no = index + 1;
        let cols = split_row(line);
        if cols.len() != 2 {
            return Err(anyhow!(
                "line {}: expected 2 columns, found {}",
                line_no,
                cols.len()
            ));
        }
        let image_id = cols[0].as_str();
        if image_id.is_empty() {
            return Err(anyhow!("line {}: empty image id", line_no));
        }
        match cols[1].parse::<u32>() {
            Ok(count) => truth.insert(image_id, count),
            Err(_) => {
                log::warn!(
                    "line {}: true count '{}' for image {} is not a count; image excluded",
                    line_no,
                    cols[1],
                    image_id
                );
                truth.mark_unusable(image_id)
            }
        }
        .with_context(|| format!("line {}", line_no))?;
    }
    Ok(truth)
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',')
        .map(|col| col.trim().trim_matches('"').trim().to_string())
        .collect()
}

/// Write scored rows as JSON Lines.
pub fn write_results(path: &Path, rows: &[ScoredRow]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create result table {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()
        .with_context(|| format!("failed to write result table {}", path.display()))?;
    log::info!("wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Reload a table written by [`write_results`].
pub fn read_results(path: &Path) -> Result<Vec<ScoredRow>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open result table {}", path.display()))?;
    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: ScoredRow = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid result row", path.display(), index + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Serialize)]
struct Summary<'a> {
    best: &'a BTreeMap<String, BestCombos>,
    scores: &'a [ComboScore],
}

/// Write the best-combo selection and the per-combo aggregate table as JSON.
pub fn write_summary(
    path: &Path,
    best: &BTreeMap<String, BestCombos>,
    scores: &[ComboScore],
) -> Result<()> {
    let json = serde_json::to_string_pretty(&Summary { best, scores })?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write summary {}", path.display()))?;
    Ok(())
}
