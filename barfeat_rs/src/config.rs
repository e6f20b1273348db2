use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::selection::{ExclusionRules, Thresholds, TrainWindow};

/// Feature suites, in the fixed order their columns are emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Suite {
    Indicators,
    Gaps,
    Volatility,
    Liquidity,
    Trend,
}

impl Suite {
    pub const ALL: [Suite; 5] = [
        Suite::Indicators,
        Suite::Gaps,
        Suite::Volatility,
        Suite::Liquidity,
        Suite::Trend,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Suite::Indicators => "indicators",
            Suite::Gaps => "gaps",
            Suite::Volatility => "volatility",
            Suite::Liquidity => "liquidity",
            Suite::Trend => "trend",
        }
    }
}

fn default_suites() -> Vec<Suite> {
    Suite::ALL.to_vec()
}

const fn default_flag_threshold() -> f64 {
    0.8
}

const fn default_prune_threshold() -> f64 {
    0.9
}

const fn default_true() -> bool {
    true
}

fn default_ffill_markers() -> Vec<String> {
    vec!["macro_positioning_data".to_string()]
}

pub const PANEL_FILE: &str = "feature_panel.csv";
pub const SELECTED_FEATURES_FILE: &str = "selected_features.txt";
pub const SELECTION_REPORT_FILE: &str = "selection_report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub input_csv: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_suites")]
    pub suites: Vec<Suite>,
    /// Rayon pool size; 0 uses the rayon default.
    #[serde(default)]
    pub n_workers: usize,
    /// When set, a next-period return column with this name is attached.
    #[serde(default)]
    pub target_column: Option<String>,
    /// Also write one CSV per suite next to the combined panel.
    #[serde(default)]
    pub split_suites: bool,
    #[serde(default)]
    pub reject_invalid_bars: bool,
    /// Inclusive bounds on the rows written. Features are always computed on
    /// the full history so warm-up windows are unaffected.
    #[serde(default)]
    pub date_start: Option<NaiveDate>,
    #[serde(default)]
    pub date_end: Option<NaiveDate>,
    #[serde(default)]
    pub ack_new_df: bool,
}

impl FeatureConfig {
    pub fn panel_path(&self) -> PathBuf {
        self.output_dir.join(PANEL_FILE)
    }

    pub fn suite_path(&self, suite: Suite) -> PathBuf {
        self.output_dir.join(format!("{}_features.csv", suite.as_str()))
    }

    pub fn includes_date(&self, date: NaiveDate) -> bool {
        self.date_start.is_none_or(|start| date >= start)
            && self.date_end.is_none_or(|end| date <= end)
    }

    /// Requested suites deduplicated into emission order.
    pub fn ordered_suites(&self) -> Vec<Suite> {
        let mut suites = self.suites.clone();
        suites.sort();
        suites.dedup();
        suites
    }

    pub fn validate(&self) -> Result<()> {
        if self.suites.is_empty() {
            bail!("At least one feature suite must be selected");
        }
        if let Some(target) = &self.target_column {
            if target.trim().is_empty() {
                bail!("--target-column must not be empty");
            }
        }
        if let (Some(start), Some(end)) = (self.date_start, self.date_end) {
            if start > end {
                bail!("--date-start {start} is after --date-end {end}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub panel_csv: PathBuf,
    pub output_dir: PathBuf,
    pub target: String,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: f64,
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,
    #[serde(default)]
    pub rules: ExclusionRules,
    #[serde(default)]
    pub ack_new_df: bool,
}

impl SelectionConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            flag: self.flag_threshold,
            prune: self.prune_threshold,
        }
    }

    pub fn train_window(&self) -> TrainWindow {
        TrainWindow {
            start: self.train_start,
            end: self.train_end,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.train_start > self.train_end {
            bail!(
                "train_start {} is after train_end {}",
                self.train_start,
                self.train_end
            );
        }
        if self.target.trim().is_empty() {
            bail!("Selection target must not be empty");
        }
        self.thresholds().validate()?;
        Ok(())
    }

    /// Fingerprint of every field that influences the selection result.
    /// Paths and the overwrite acknowledgement are left out so moving a
    /// panel does not change the hash.
    pub fn stable_hash(&self) -> Result<String> {
        let payload = serde_json::json!({
            "target": self.target,
            "train_start": self.train_start,
            "train_end": self.train_end,
            "flag_threshold": self.flag_threshold,
            "prune_threshold": self.prune_threshold,
            "rules": self.rules,
        });
        let serialized = serde_json::to_vec(&payload)?;
        Ok(hex::encode(Sha256::digest(serialized)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntradayConfig {
    pub minute_csv: PathBuf,
    pub hourly_csv: PathBuf,
    pub output_csv: PathBuf,
    /// Merge 09:00-09:29 pre-market bars into High, Low and Volume.
    #[serde(default = "default_true")]
    pub include_extended: bool,
    #[serde(default)]
    pub ack_new_df: bool,
}

impl IntradayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.minute_csv == self.hourly_csv {
            bail!("Minute and hourly inputs must be different files");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedSource {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// The first source defines the master calendar.
    pub sources: Vec<NamedSource>,
    pub output_csv: PathBuf,
    /// Columns containing any of these markers are forward-filled.
    #[serde(default = "default_ffill_markers")]
    pub ffill_markers: Vec<String>,
    /// Merged (prefixed) close column used to derive the target.
    #[serde(default)]
    pub close_column: Option<String>,
    #[serde(default)]
    pub target_column: Option<String>,
    #[serde(default)]
    pub ack_new_df: bool,
}

impl MergeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("At least one --source name=FILE is required");
        }
        if let Some(name) = self.sources.iter().map(|s| s.name.as_str()).duplicates().next() {
            bail!("Duplicate source name '{name}'");
        }
        if self.target_column.is_some() && self.close_column.is_none() {
            bail!("--target-column requires --close-column");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection() -> SelectionConfig {
        SelectionConfig {
            panel_csv: PathBuf::from("a/feature_panel.csv"),
            output_dir: PathBuf::from("a"),
            target: "target".into(),
            train_start: NaiveDate::from_ymd_opt(2020, 1, 1).expect("date"),
            train_end: NaiveDate::from_ymd_opt(2021, 1, 1).expect("date"),
            flag_threshold: 0.8,
            prune_threshold: 0.9,
            rules: ExclusionRules::default(),
            ack_new_df: false,
        }
    }

    #[test]
    fn stable_hash_ignores_paths_but_tracks_thresholds() {
        let base = selection();
        let mut moved = selection();
        moved.panel_csv = PathBuf::from("b/feature_panel.csv");
        moved.output_dir = PathBuf::from("b");
        assert_eq!(base.stable_hash().expect("hash"), moved.stable_hash().expect("hash"));

        let mut tighter = selection();
        tighter.prune_threshold = 0.85;
        assert_ne!(base.stable_hash().expect("hash"), tighter.stable_hash().expect("hash"));
    }

    #[test]
    fn selection_validate_rejects_inverted_window() {
        let mut cfg = selection();
        std::mem::swap(&mut cfg.train_start, &mut cfg.train_end);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn feature_config_defaults_from_json() {
        let cfg: FeatureConfig =
            serde_json::from_str(r#"{"input_csv":"in.csv","output_dir":"out"}"#).expect("parse");
        assert_eq!(cfg.suites, Suite::ALL.to_vec());
        assert!(!cfg.split_suites);
        assert_eq!(cfg.panel_path(), PathBuf::from("out").join(PANEL_FILE));
    }

    #[test]
    fn ordered_suites_follow_emission_order() {
        let cfg = FeatureConfig {
            input_csv: "in.csv".into(),
            output_dir: "out".into(),
            suites: vec![Suite::Trend, Suite::Gaps, Suite::Trend],
            n_workers: 0,
            target_column: None,
            split_suites: false,
            reject_invalid_bars: false,
            date_start: NaiveDate::from_ymd_opt(2020, 1, 1),
            date_end: None,
            ack_new_df: false,
        };
        assert_eq!(cfg.ordered_suites(), vec![Suite::Gaps, Suite::Trend]);
        assert!(!cfg.includes_date(NaiveDate::from_ymd_opt(2019, 12, 31).expect("date")));
        assert!(cfg.includes_date(NaiveDate::from_ymd_opt(2024, 6, 3).expect("date")));
    }

    #[test]
    fn merge_requires_unique_names() {
        let cfg = MergeConfig {
            sources: vec![
                NamedSource {
                    name: "spy".into(),
                    path: "a.csv".into(),
                },
                NamedSource {
                    name: "spy".into(),
                    path: "b.csv".into(),
                },
            ],
            output_csv: "out.csv".into(),
            ffill_markers: default_ffill_markers(),
            close_column: None,
            target_column: None,
            ack_new_df: false,
        };
        assert!(cfg.validate().is_err());
    }
}
