use std::fs;

use anyhow::Result;
use barfeat_rs::FeaturePanel;
use barfeat_rs::storage::{WriteOutcome, read_csv_frame, sha256_file, write_frame_guarded};
use chrono::{Duration, NaiveDate};
use tempfile::tempdir;

fn panel(scale: f64) -> FeaturePanel {
    let start = NaiveDate::from_ymd_opt(2023, 6, 1).expect("valid date");
    let dates = (0..4).map(|i| start + Duration::days(i)).collect();
    let mut panel = FeaturePanel::new(dates);
    panel
        .push("ret_1d", vec![f64::NAN, 0.01 * scale, -0.02 * scale, 0.005 * scale])
        .expect("row counts match");
    panel
}

#[test]
fn guard_reuses_identical_output_and_requires_ack_for_changes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("feature_panel.csv");

    let mut first = panel(1.0).to_data_frame()?;
    assert_eq!(write_frame_guarded(&mut first, &path, false)?, WriteOutcome::Created);
    let original_hash = sha256_file(&path)?;

    let mut same = panel(1.0).to_data_frame()?;
    assert_eq!(write_frame_guarded(&mut same, &path, false)?, WriteOutcome::Unchanged);
    assert_eq!(sha256_file(&path)?, original_hash);

    let mut changed = panel(2.0).to_data_frame()?;
    let err = write_frame_guarded(&mut changed, &path, false)
        .expect_err("different content needs acknowledgement");
    let msg = err.to_string();
    assert!(msg.contains("--ack-new-df"), "unexpected message: {msg}");
    assert!(msg.contains(&original_hash), "message names the existing hash: {msg}");
    assert_eq!(sha256_file(&path)?, original_hash, "file untouched on refusal");

    assert_eq!(
        write_frame_guarded(&mut changed, &path, true)?,
        WriteOutcome::Overwritten
    );
    assert_ne!(sha256_file(&path)?, original_hash);
    Ok(())
}

#[test]
fn panel_round_trips_through_csv_with_empty_null_cells() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("panel.csv");
    let original = panel(1.0);
    let mut frame = original.to_data_frame()?;
    write_frame_guarded(&mut frame, &path, false)?;

    let text = fs::read_to_string(&path)?;
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Date,ret_1d"));
    assert_eq!(lines.next(), Some("2023-06-01,"), "null written as an empty cell");

    let reread = FeaturePanel::from_data_frame(&read_csv_frame(&path)?)?;
    assert_eq!(reread.dates(), original.dates());
    let values = reread.column("ret_1d").expect("column survives");
    assert!(values[0].is_nan());
    assert!((values[2] + 0.02).abs() < 1e-12);
    Ok(())
}
