use std::path::Path;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use seal_tune::{
    aggregate, run_sweep, score_rows, select_best, table, NoProgress, Statistic, SweepContext,
    SweepSettings, TuningConfig,
};

fn write_image(path: &Path) {
    RgbImage::from_pixel(200, 200, Rgb([120, 110, 100]))
        .save(path)
        .expect("write image");
}

fn seal(conf: f32, x: f32, y: f32) -> String {
    format!(
        r#"{{"class": "seal", "confidence": {conf}, "x": {x}, "y": {y}, "width": 8, "height": 8}}"#
    )
}

fn clump(conf: f32, x: f32, y: f32) -> String {
    format!(
        r#"{{"class": "clump", "confidence": {conf}, "x": {x}, "y": {y}, "width": 30, "height": 30}}"#
    )
}

/// Two beaches on disk, replayed detections and a one-leaf forest predicting
/// three seals per clump.
fn workspace() -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = dir.path();
    for (beach, images) in [("north", ["img1.png", "img2.png"].as_slice()), ("south", ["img3.png"].as_slice())] {
        std::fs::create_dir(root.join(beach)).unwrap();
        for image in images {
            write_image(&root.join(beach).join(image));
        }
    }

    let img1 = [seal(0.90, 20.0, 20.0), seal(0.85, 60.0, 20.0), seal(0.30, 100.0, 20.0)].join(",");
    let img3 = [
        seal(0.95, 20.0, 20.0),
        clump(0.80, 100.0, 100.0),
        clump(0.70, 150.0, 150.0),
        // inside the first clump; counted through it
        seal(0.90, 100.0, 100.0),
    ]
    .join(",");
    let fixture = format!(
        r#"{{"images": {{
            "img1": {{"detections": [{img1}]}},
            "img2": {{"detections": []}},
            "img3": {{"detections": [{img3}]}}
        }}}}"#
    );
    std::fs::write(root.join("detections.json"), fixture).unwrap();

    let forest = r#"{"trees": [{
        "children_left": [-1],
        "children_right": [-1],
        "feature": [-2],
        "threshold": [-2.0],
        "value": [3.0]
    }]}"#;
    std::fs::write(root.join("forest.json"), forest).unwrap();

    std::fs::write(root.join("counts.csv"), "image_id,count\nimg1,10\nimg2,5\nimg3,7\n").unwrap();

    let config = format!(
        r#"
ground_truth = "{root}/counts.csv"
workers = 2

[ranges]
seal_confidence = {{ min = 50, max = 50 }}
clump_confidence = {{ min = 50, max = 50 }}
overlap = {{ min = 30, max = 30 }}
clump_threshold = {{ min = 1, max = 3 }}

[[beaches]]
name = "north"
dir = "{root}/north"

[[beaches]]
name = "south"
dir = "{root}/south"

[detector]
kind = "fixture"
path = "{root}/detections.json"

[regressor]
kind = "forest"
path = "{root}/forest.json"
"#,
        root = root.display()
    );
    std::fs::write(root.join("tune.toml"), config).unwrap();
    dir
}

#[test]
fn selects_best_combos_per_beach() {
    let dir = workspace();
    let cfg = TuningConfig::load(Some(&dir.path().join("tune.toml"))).expect("load config");
    let beaches = cfg.resolve_beaches().expect("beaches");
    let truth = table::read_ground_truth(cfg.ground_truth.as_deref().unwrap()).expect("truth");

    let ctx = SweepContext::open(cfg.detector.as_ref().unwrap(), cfg.regressor.as_ref().unwrap())
        .expect("services");
    let settings = SweepSettings {
        ranges: cfg.ranges,
        boundary: cfg.boundary,
        sampling: cfg.sampling,
        workers: cfg.workers,
    };
    let outcome = run_sweep(&ctx, &beaches, &settings, &NoProgress).expect("sweep");

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.detection_calls, 3);
    assert_eq!(outcome.rows.len(), 3 * 3);

    let estimate = |image: &str, threshold: u32| {
        outcome
            .rows
            .iter()
            .find(|r| r.image_id == image && r.combo.clump_threshold == threshold)
            .map(|r| r.estimated_count)
            .unwrap()
    };
    assert_eq!(estimate("img1", 1), 2.0);
    assert_eq!(estimate("img2", 1), 0.0);
    assert_eq!(estimate("img3", 1), 1.0 + 6.0);
    assert_eq!(estimate("img3", 2), 1.0 + 6.0);
    assert_eq!(estimate("img3", 3), 1.0);

    let scored = score_rows(outcome.rows, &truth);
    let scores = aggregate(&scored, Statistic::Median);
    let best = select_best(&scores);

    let north = &best["north"];
    assert!((north.score - 0.9).abs() < 1e-12);
    assert_eq!(north.combos.len(), 3);

    let south = &best["south"];
    assert_eq!(south.score, 0.0);
    let thresholds: Vec<u32> = south.combos.iter().map(|c| c.clump_threshold).collect();
    assert_eq!(thresholds, vec![1, 2]);

    let path = dir.path().join("results.jsonl");
    table::write_results(&path, &scored).expect("write table");
    let reloaded = table::read_results(&path).expect("read table");
    assert_eq!(select_best(&aggregate(&reloaded, Statistic::Median)), best);
}

#[test]
fn unknown_image_is_a_recorded_failure() {
    let dir = workspace();
    write_image(&dir.path().join("north").join("img4.png"));

    let cfg = TuningConfig::load(Some(&dir.path().join("tune.toml"))).expect("load config");
    let beaches = cfg.resolve_beaches().expect("beaches");
    let ctx = SweepContext::open(cfg.detector.as_ref().unwrap(), cfg.regressor.as_ref().unwrap())
        .expect("services");
    let settings = SweepSettings {
        ranges: cfg.ranges,
        boundary: cfg.boundary,
        sampling: cfg.sampling,
        workers: 1,
    };
    let outcome = run_sweep(&ctx, &beaches, &settings, &NoProgress).expect("sweep");

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].image_id, "img4");
    assert!(outcome.rows.iter().all(|r| r.image_id != "img4"));
    assert_eq!(outcome.rows.len(), 3 * 3);
}

#[test]
fn stray_file_in_beach_dir_fails_configuration() {
    let dir = workspace();
    std::fs::write(dir.path().join("north").join("notes.txt"), "flight log").unwrap();
    let cfg = TuningConfig::load(Some(&dir.path().join("tune.toml"))).expect("load config");
    let err = cfg.resolve_beaches().unwrap_err();
    assert!(format!("{err:#}").contains("notes.txt"));
}
