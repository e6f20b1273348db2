use std::fs;
use std::path::Path;

use anyhow::Result;
use barfeat_rs::storage::write_frame_guarded;
use barfeat_rs::{ExclusionRules, FeaturePanel, SelectionConfig, run_selection};
use chrono::{Duration, NaiveDate};
use tempfile::tempdir;

const TARGET: &str = "SPY_NextDay_Return";

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 3, 1).expect("valid date")
}

fn write_panel(path: &Path) -> Result<()> {
    let rows = 40;
    let dates = (0..rows).map(|i| start() + Duration::days(i as i64)).collect();
    let mut panel = FeaturePanel::new(dates);
    let wave = |i: usize, k: f64| ((i as f64 + 1.0) * k).sin();
    panel.push("Close", (0..rows).map(|i| 100.0 + i as f64).collect())?;
    panel.push("mom_5d", (0..rows).map(|i| wave(i, 0.37)).collect())?;
    panel.push("vol_ratio", (0..rows).map(|i| wave(i, 1.91)).collect())?;
    panel.push(TARGET, (0..rows).map(|i| wave(i, 0.53) * 0.01).collect())?;
    write_frame_guarded(&mut panel.to_data_frame()?, path, false)?;
    Ok(())
}

fn config(panel_csv: &Path, output_dir: &Path) -> SelectionConfig {
    SelectionConfig {
        panel_csv: panel_csv.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        target: TARGET.to_string(),
        train_start: start(),
        train_end: start() + Duration::days(29),
        flag_threshold: 0.8,
        prune_threshold: 0.9,
        rules: ExclusionRules::default(),
        ack_new_df: false,
    }
}

#[test]
fn rerun_reuses_artifacts_and_changed_outcome_needs_ack() -> Result<()> {
    let dir = tempdir()?;
    let panel_csv = dir.path().join("feature_panel.csv");
    write_panel(&panel_csv)?;
    let out = dir.path().join("selection");
    let mut cfg = config(&panel_csv, &out);

    run_selection(&cfg)?;
    let report_path = out.join("selection_report.json");
    let list = fs::read_to_string(out.join("selected_features.txt"))?;
    let report = fs::read(&report_path)?;
    assert!(list.lines().all(|name| name != "Close" && name != TARGET));

    run_selection(&cfg)?;
    assert_eq!(fs::read(&report_path)?, report, "identical rerun leaves artifacts alone");

    cfg.flag_threshold = 0.7;
    let err = run_selection(&cfg).expect_err("changed report is guarded");
    assert!(format!("{err:#}").contains("--ack-new-df"), "got: {err:#}");
    assert_eq!(fs::read(&report_path)?, report);

    cfg.ack_new_df = true;
    let rerun = run_selection(&cfg)?;
    assert_ne!(fs::read(&report_path)?, report);
    assert_eq!(rerun.thresholds.flag, 0.7);
    Ok(())
}
