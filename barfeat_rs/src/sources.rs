//! Multi-source calendar merge.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use polars::prelude::*;
use tracing::{info, warn};

use crate::config::MergeConfig;
use crate::dates::detect_date_column;
use crate::labels::next_period_return;
use crate::ops::forward_fill;
use crate::panel::FeaturePanel;
use crate::storage::{read_csv_frame, write_frame_guarded};

/// Converts one raw source into a panel whose columns are prefixed with
/// `{name}_`. Sources without a date-like column yield `None`.
pub fn source_panel(name: &str, frame: &DataFrame) -> Result<Option<FeaturePanel>> {
    let has_date = detect_date_column(frame.get_column_names().iter().copied()).is_some();
    if !has_date {
        warn!(source = name, "Skipping source without a date-like column");
        return Ok(None);
    }
    let mut panel = FeaturePanel::from_data_frame(frame)
        .with_context(|| format!("Failed to read source '{name}'"))?;
    panel.prefix_columns(name);
    info!(source = name, rows = panel.height(), columns = panel.width(), "Source parsed");
    Ok(Some(panel))
}

#[derive(Clone, Debug, Default)]
pub struct MergeOptions {
    pub ffill_markers: Vec<String>,
    pub close_column: Option<String>,
    pub target_column: Option<String>,
}

/// Left-joins every source onto the first source's calendar, then drops
/// all-null columns, attaches the next-period target and forward-fills
/// marker columns.
pub fn merge_sources(sources: &[(String, FeaturePanel)], options: &MergeOptions) -> Result<FeaturePanel> {
    let (_, master) = sources
        .first()
        .ok_or_else(|| anyhow!("No usable sources to merge"))?;
    let mut merged = FeaturePanel::new(master.dates().to_vec());
    for (name, panel) in sources {
        let skipped = merged.left_join(panel);
        if skipped > 0 {
            warn!(source = %name, skipped, "Duplicate columns ignored during merge");
        }
    }

    let before = merged.width();
    merged.retain_columns(|_, values| values.iter().any(|v| v.is_finite()));
    info!(dropped = before - merged.width(), "Dropped all-null columns");

    if let Some(close_column) = &options.close_column {
        let target_name = options
            .target_column
            .clone()
            .unwrap_or_else(|| "SPY_NextDay_Return".to_string());
        let close = merged
            .column(close_column)
            .with_context(|| format!("Close column '{close_column}' not found after merge"))?;
        let target = next_period_return(close);
        let keep: Vec<bool> = target.iter().map(|v| v.is_finite()).collect();
        merged.push(target_name.clone(), target)?;
        merged.retain_rows(&keep);
        info!(target = %target_name, rows = merged.height(), "Target attached");
    }

    let markers = &options.ffill_markers;
    let to_fill: Vec<String> = merged
        .column_names()
        .filter(|name| markers.iter().any(|m| name.contains(m.as_str())))
        .map(str::to_string)
        .collect();
    for name in &to_fill {
        merged.map_column(name, forward_fill);
    }
    if !to_fill.is_empty() {
        info!(columns = to_fill.len(), "Forward-filled marker columns");
    }
    Ok(merged)
}

pub fn run_merge(config: &MergeConfig) -> Result<PathBuf> {
    config.validate()?;
    let mut panels = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let frame = read_csv_frame(&source.path)?;
        if let Some(panel) = source_panel(&source.name, &frame)? {
            panels.push((source.name.clone(), panel));
        }
    }
    let options = MergeOptions {
        ffill_markers: config.ffill_markers.clone(),
        close_column: config.close_column.clone(),
        target_column: config.target_column.clone(),
    };
    let merged = merge_sources(&panels, &options)?;
    let mut frame = merged.to_data_frame()?;
    write_frame_guarded(&mut frame, &config.output_csv, config.ack_new_df)?;
    Ok(config.output_csv.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefixes_joins_and_labels() {
        let prices = df!(
            "Date" => ["2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"],
            "close" => [100.0, 101.0, 99.0, 102.0],
        )
        .expect("frame");
        let macro_frame = df!(
            "date" => ["01/02/2024", "01/04/2024"],
            "vix" => [12.0, 14.0],
            "empty" => [None::<f64>, None],
        )
        .expect("frame");
        let sources = vec![
            (
                "spy".to_string(),
                source_panel("spy", &prices).expect("parse").expect("has date"),
            ),
            (
                "macro_positioning_data".to_string(),
                source_panel("macro_positioning_data", &macro_frame)
                    .expect("parse")
                    .expect("has date"),
            ),
        ];
        let options = MergeOptions {
            ffill_markers: vec!["macro_positioning_data".into()],
            close_column: Some("spy_close".into()),
            target_column: Some("target".into()),
        };
        let merged = merge_sources(&sources, &options).expect("merge");

        assert_eq!(merged.height(), 3, "last row has no next-day return");
        assert!(!merged.contains("macro_positioning_data_empty"));
        let vix = merged.column("macro_positioning_data_vix").expect("vix");
        assert_eq!(vix, &[12.0, 12.0, 14.0]);
        let target = merged.column("target").expect("target");
        assert!((target[0] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn source_without_date_column_is_skipped() {
        let frame = df!("value" => [1.0, 2.0]).expect("frame");
        assert!(source_panel("x", &frame).expect("no error").is_none());
    }
}
