use std::sync::Mutex;

use tempfile::NamedTempFile;

use seal_tune::config::{DetectorSettings, RegressorSettings, TuningConfig};
use seal_tune::{ChannelSampling, Statistic, ThresholdBoundary};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SEAL_TUNE_CONFIG",
        "SEAL_TUNE_GROUND_TRUTH",
        "SEAL_TUNE_WRITE_RESULTS",
        "SEAL_TUNE_STATISTIC",
        "SEAL_TUNE_WORKERS",
        "ROBOFLOW_API_KEY",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

const BASE: &str = r#"{
    "ranges": {
        "seal_confidence": {"min": 40, "max": 60, "step": 10},
        "clump_confidence": {"min": 40, "max": 60, "step": 10},
        "overlap": {"min": 30, "max": 50, "step": 10},
        "clump_threshold": {"min": 1, "max": 5}
    },
    "beaches": [
        {"name": "north", "images": ["north/img1.jpg", "north/img2.jpg"]}
    ],
    "ground_truth": "counts.csv",
    "detector": {"kind": "roboflow", "project": "seal-census", "version": 3},
    "regressor": {"kind": "forest", "path": "clump_forest.json"}
}"#;

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(BASE);
    std::env::set_var("SEAL_TUNE_CONFIG", file.path());
    std::env::set_var("SEAL_TUNE_STATISTIC", "mean");
    std::env::set_var("SEAL_TUNE_WORKERS", "2");
    std::env::set_var("SEAL_TUNE_WRITE_RESULTS", "results.jsonl");
    std::env::set_var("ROBOFLOW_API_KEY", "rf-secret");

    let cfg = TuningConfig::load(None).expect("load config");

    assert_eq!(cfg.ranges.seal_confidence.values(), vec![40, 50, 60]);
    assert_eq!(cfg.ranges.clump_threshold.step(), 1);
    assert_eq!(cfg.ranges.combinations(), Some(3 * 3 * 3 * 5));
    assert_eq!(cfg.statistic, Statistic::Mean);
    assert_eq!(cfg.workers, 2);
    assert_eq!(cfg.write_results.as_deref(), Some(std::path::Path::new("results.jsonl")));
    assert_eq!(cfg.ground_truth.as_deref(), Some(std::path::Path::new("counts.csv")));
    assert_eq!(cfg.boundary, ThresholdBoundary::Inclusive);
    assert_eq!(cfg.sampling, ChannelSampling::Legacy);
    match cfg.detector {
        Some(DetectorSettings::Roboflow(rf)) => {
            assert_eq!(rf.project, "seal-census");
            assert_eq!(rf.version, 3);
            assert_eq!(rf.api_key, "rf-secret");
            assert_eq!(rf.endpoint, "https://detect.roboflow.com");
        }
        other => panic!("unexpected detector {:?}", other),
    }
    assert!(matches!(cfg.regressor, Some(RegressorSettings::Forest { .. })));

    clear_env();
}

#[test]
fn explicit_path_wins_over_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SEAL_TUNE_CONFIG", "/nonexistent/config.json");
    let file = write_config(BASE);
    let cfg = TuningConfig::load(Some(file.path())).expect("load config");
    assert_eq!(cfg.beaches.len(), 1);

    clear_env();
}

#[test]
fn rejects_confidence_above_100() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(&BASE.replace(
        r#""seal_confidence": {"min": 40, "max": 60, "step": 10}"#,
        r#""seal_confidence": {"min": 40, "max": 120, "step": 10}"#,
    ));
    let err = TuningConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("seal_confidence"));

    clear_env();
}

#[test]
fn rejects_overlap_above_100_and_oversized_grids() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(&BASE.replace(
        r#""overlap": {"min": 30, "max": 50, "step": 10}"#,
        r#""overlap": {"min": 30, "max": 4294967295, "step": 1}"#,
    ));
    let err = TuningConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("overlap"));

    let file = write_config(&BASE.replace(
        r#""clump_threshold": {"min": 1, "max": 5}"#,
        r#""clump_threshold": {"min": 0, "max": 4294967295}"#,
    ));
    let err = TuningConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("combinations"));

    clear_env();
}

#[test]
fn rejects_inverted_range() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(&BASE.replace(
        r#""overlap": {"min": 30, "max": 50, "step": 10}"#,
        r#""overlap": {"min": 50, "max": 30, "step": 10}"#,
    ));
    let err = TuningConfig::load(Some(file.path())).unwrap_err();
    assert!(format!("{err:#}").contains("exceeds maximum"));

    clear_env();
}

#[test]
fn rejects_zero_workers_and_duplicate_beaches() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(BASE);
    std::env::set_var("SEAL_TUNE_WORKERS", "0");
    assert!(TuningConfig::load(Some(file.path())).is_err());
    std::env::remove_var("SEAL_TUNE_WORKERS");

    let file = write_config(&BASE.replace(
        r#"{"name": "north", "images": ["north/img1.jpg", "north/img2.jpg"]}"#,
        r#"{"name": "north", "images": ["a.jpg"]}, {"name": "north", "dir": "north"}"#,
    ));
    let err = TuningConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("configured twice"));

    clear_env();
}
