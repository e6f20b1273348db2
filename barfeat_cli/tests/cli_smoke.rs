use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::tempdir;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn barfeat() -> Command {
    if let Some(bin) = option_env!("CARGO_BIN_EXE_barfeat_cli") {
        Command::new(bin)
    } else {
        let mut cmd = Command::new("cargo");
        cmd.args(["run", "-p", "barfeat_cli", "--"]);
        cmd
    }
}

fn sample_csv() -> PathBuf {
    let path = workspace_root()
        .join("tests")
        .join("data")
        .join("spy_daily_sample.csv");
    assert!(path.exists(), "sample CSV missing at {}", path.display());
    path
}

fn run_features(sample: &Path, output_dir: &Path) -> std::process::ExitStatus {
    barfeat()
        .args([
            "features",
            "--csv",
            sample.to_str().expect("sample"),
            "--output-dir",
            output_dir.to_str().expect("output"),
            "--target-column",
            "SPY_NextDay_Return",
            "--workers",
            "2",
        ])
        .current_dir(workspace_root())
        .status()
        .expect("failed to spawn barfeat_cli")
}

#[test]
fn cli_builds_panel_and_selects_features_on_sample_dataset() {
    let sample = sample_csv();
    let temp_dir = tempdir().expect("temp output dir");
    let output_dir = temp_dir.path().join("barfeat_output");

    let status = run_features(&sample, &output_dir);
    assert!(status.success(), "features exited with {status:?}");

    let panel_csv = output_dir.join("feature_panel.csv");
    assert!(panel_csv.exists(), "expected panel at {}", panel_csv.display());
    let first_pass = fs::read(&panel_csv).expect("read panel");
    let header = String::from_utf8_lossy(&first_pass)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    assert!(header.starts_with("Date,Open,High,Low,Close,Volume,ret_1d"), "{header}");
    assert!(header.ends_with("SPY_NextDay_Return"), "{header}");
    assert!(output_dir.join("barfeat.log").exists(), "file log enabled by default");

    let status = run_features(&sample, &output_dir);
    assert!(status.success(), "identical rerun is accepted without --ack-new-df");
    assert_eq!(fs::read(&panel_csv).expect("reread panel"), first_pass);

    let status = barfeat()
        .args([
            "select",
            "--panel",
            panel_csv.to_str().expect("panel"),
            "--output-dir",
            output_dir.to_str().expect("output"),
            "--target",
            "SPY_NextDay_Return",
            "--train-start",
            "2019-01-02",
            "--train-end",
            "2019-12-31",
            "--no-file-log",
        ])
        .current_dir(workspace_root())
        .status()
        .expect("failed to spawn barfeat_cli");
    assert!(status.success(), "select exited with {status:?}");

    let selected = fs::read_to_string(output_dir.join("selected_features.txt"))
        .expect("selected features written");
    let selected: Vec<&str> = selected.lines().collect();
    assert!(!selected.is_empty(), "some features survive the audit");
    for forbidden in ["Date", "Close", "Open", "SPY_NextDay_Return", "prev_Close"] {
        assert!(!selected.contains(&forbidden), "{forbidden} must be excluded");
    }

    let report: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(output_dir.join("selection_report.json")).expect("report written"),
    )
    .expect("report is json");
    assert_eq!(report["target"], "SPY_NextDay_Return");
    assert!(report["config_hash"].as_str().is_some_and(|h| h.len() == 64));
}

#[test]
fn cli_rejects_malformed_train_dates() {
    let temp_dir = tempdir().expect("temp output dir");
    let status = barfeat()
        .args([
            "select",
            "--panel",
            "missing.csv",
            "--output-dir",
            temp_dir.path().to_str().expect("output"),
            "--train-start",
            "01/02/2019",
            "--train-end",
            "2019-12-31",
            "--no-file-log",
        ])
        .current_dir(workspace_root())
        .status()
        .expect("failed to spawn barfeat_cli");
    assert!(!status.success());
}
