use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use barfeat_rs::config::NamedSource;
use barfeat_rs::{
    ExclusionRules, FeatureConfig, IntradayConfig, MergeConfig, SelectionConfig, Suite,
};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "barfeat",
    about = "Daily OHLCV feature engineering and leakage-safe feature selection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute feature suites from a daily OHLCV CSV
    #[command(name = "features")]
    Features(FeaturesArgs),
    /// Prune a feature panel by train-window correlation with a target
    #[command(name = "select")]
    Select(SelectArgs),
    /// Rebuild daily RTH bars from minute and hourly bars
    #[command(name = "aggregate")]
    Aggregate(AggregateArgs),
    /// Left-join several dated CSVs onto the first source's calendar
    #[command(name = "merge")]
    Merge(MergeArgs),
}

#[derive(Parser, Debug)]
pub struct FeaturesArgs {
    /// Path to the input CSV file with daily OHLCV data
    #[arg(long = "csv", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub csv_path: PathBuf,

    /// Output directory for feature_panel.csv and per-suite files
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Suites to compute (comma-delimited). Defaults to all five.
    #[arg(long = "suites", value_enum, value_delimiter = ',', num_args = 1..)]
    pub suites: Vec<SuiteValue>,

    /// Number of worker threads (omit to use all logical cores)
    #[arg(long = "workers", alias = "n-jobs")]
    pub workers: Option<usize>,

    /// Attach the next-day close-to-close return under this column name
    #[arg(long = "target-column")]
    pub target_column: Option<String>,

    /// Also write one CSV per suite next to the combined panel
    #[arg(long = "split-suites", default_value_t = false)]
    pub split_suites: bool,

    /// Fail instead of warning when a bar violates Low <= Open,Close <= High
    #[arg(long = "reject-invalid-bars", default_value_t = false)]
    pub reject_invalid_bars: bool,

    /// Inclusive start of the rows written (YYYY-MM-DD)
    #[arg(long = "date-start")]
    pub date_start: Option<String>,

    /// Inclusive end of the rows written (YYYY-MM-DD)
    #[arg(long = "date-end")]
    pub date_end: Option<String>,

    /// Acknowledge that a newly computed panel differs from an existing
    /// feature_panel.csv in the output directory; overwrite it.
    #[arg(long = "ack-new-df", default_value_t = false)]
    pub ack_new_df: bool,

    /// Disable writing barfeat.log into the output directory
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,
}

#[derive(Parser, Debug)]
pub struct SelectArgs {
    /// Feature panel CSV with a Date column and the target column
    #[arg(long = "panel", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub panel_csv: PathBuf,

    /// Output directory for selected_features.txt and selection_report.json
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Target column the correlation audit is measured against
    #[arg(long = "target", default_value = "SPY_NextDay_Return")]
    pub target: String,

    /// First training date, inclusive (YYYY-MM-DD)
    #[arg(long = "train-start")]
    pub train_start: String,

    /// Last training date, inclusive (YYYY-MM-DD)
    #[arg(long = "train-end")]
    pub train_end: String,

    /// Absolute correlation above which a feature is flagged
    #[arg(long = "flag-threshold", default_value_t = 0.8)]
    pub flag_threshold: f64,

    /// Absolute correlation above which a flagged feature is always dropped
    #[arg(long = "prune-threshold", default_value_t = 0.9)]
    pub prune_threshold: f64,

    /// JSON file overriding the exclusion rules; omitted fields keep defaults
    #[arg(long = "rules", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub rules: Option<PathBuf>,

    #[arg(long = "ack-new-df", default_value_t = false)]
    pub ack_new_df: bool,

    /// Disable writing barfeat.log into the output directory
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,
}

#[derive(Parser, Debug)]
pub struct AggregateArgs {
    /// Minute bars covering the 09:00-10:00 exchange-time window
    #[arg(long = "minute", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub minute_csv: PathBuf,

    /// Hourly bars labelled by the end of their hour
    #[arg(long = "hourly", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub hourly_csv: PathBuf,

    /// Destination CSV for the daily bars
    #[arg(long = "output", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub output_csv: PathBuf,

    /// Merge 09:00-09:29 pre-market bars into High, Low and Volume
    #[arg(long = "include-extended", action = ArgAction::Set, default_value_t = true)]
    pub include_extended: bool,

    #[arg(long = "ack-new-df", default_value_t = false)]
    pub ack_new_df: bool,

    /// Disable writing barfeat.log next to the output file
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,
}

#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Named source as name=FILE; repeat for each source. The first source
    /// defines the calendar.
    #[arg(long = "source", value_parser = parse_named_source, required = true)]
    pub sources: Vec<NamedSource>,

    /// Destination CSV for the merged panel
    #[arg(long = "output", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub output_csv: PathBuf,

    /// Column-name marker selecting columns to forward-fill (repeatable)
    #[arg(long = "ffill-marker", default_values_t = [String::from("macro_positioning_data")])]
    pub ffill_markers: Vec<String>,

    /// Merged close column used to derive the next-day return target
    #[arg(long = "close-column")]
    pub close_column: Option<String>,

    /// Name of the attached target column
    #[arg(long = "target-column")]
    pub target_column: Option<String>,

    #[arg(long = "ack-new-df", default_value_t = false)]
    pub ack_new_df: bool,

    /// Disable writing barfeat.log next to the output file
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}

impl Commands {
    /// `barfeat.log` location, or `None` when file logging is disabled.
    pub fn log_file(&self) -> Option<PathBuf> {
        let sibling = |path: &PathBuf| {
            path.parent()
                .map(|dir| dir.join("barfeat.log"))
                .unwrap_or_else(|| PathBuf::from("barfeat.log"))
        };
        match self {
            Commands::Features(args) if !args.no_file_log => {
                Some(args.output_dir.join("barfeat.log"))
            }
            Commands::Select(args) if !args.no_file_log => {
                Some(args.output_dir.join("barfeat.log"))
            }
            Commands::Aggregate(args) if !args.no_file_log => Some(sibling(&args.output_csv)),
            Commands::Merge(args) if !args.no_file_log => Some(sibling(&args.output_csv)),
            _ => None,
        }
    }
}

impl FeaturesArgs {
    pub fn into_config(self) -> Result<FeatureConfig> {
        let suites = if self.suites.is_empty() {
            Suite::ALL.to_vec()
        } else {
            self.suites.iter().map(|s| s.to_suite()).collect()
        };
        let config = FeatureConfig {
            input_csv: self.csv_path,
            output_dir: self.output_dir,
            suites,
            n_workers: self.workers.unwrap_or(0),
            target_column: self.target_column,
            split_suites: self.split_suites,
            reject_invalid_bars: self.reject_invalid_bars,
            date_start: parse_optional_date(self.date_start.as_deref())?,
            date_end: parse_optional_date(self.date_end.as_deref())?,
            ack_new_df: self.ack_new_df,
        };
        config.validate()?;
        Ok(config)
    }
}

impl SelectArgs {
    pub fn into_config(self) -> Result<SelectionConfig> {
        let rules = match &self.rules {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Unable to read rules file {}", path.display()))?;
                serde_json::from_str::<ExclusionRules>(&raw)
                    .with_context(|| format!("Invalid rules JSON in {}", path.display()))?
            }
            None => ExclusionRules::default(),
        };
        let config = SelectionConfig {
            panel_csv: self.panel_csv,
            output_dir: self.output_dir,
            target: self.target,
            train_start: parse_required_date(&self.train_start)?,
            train_end: parse_required_date(&self.train_end)?,
            flag_threshold: self.flag_threshold,
            prune_threshold: self.prune_threshold,
            rules,
            ack_new_df: self.ack_new_df,
        };
        config.validate()?;
        Ok(config)
    }
}

impl AggregateArgs {
    pub fn into_config(self) -> Result<IntradayConfig> {
        let config = IntradayConfig {
            minute_csv: self.minute_csv,
            hourly_csv: self.hourly_csv,
            output_csv: self.output_csv,
            include_extended: self.include_extended,
            ack_new_df: self.ack_new_df,
        };
        config.validate()?;
        Ok(config)
    }
}

impl MergeArgs {
    pub fn into_config(self) -> Result<MergeConfig> {
        let config = MergeConfig {
            sources: self.sources,
            output_csv: self.output_csv,
            ffill_markers: self.ffill_markers,
            close_column: self.close_column,
            target_column: self.target_column,
            ack_new_df: self.ack_new_df,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SuiteValue {
    Indicators,
    Gaps,
    Volatility,
    Liquidity,
    Trend,
}

impl SuiteValue {
    fn to_suite(self) -> Suite {
        match self {
            SuiteValue::Indicators => Suite::Indicators,
            SuiteValue::Gaps => Suite::Gaps,
            SuiteValue::Volatility => Suite::Volatility,
            SuiteValue::Liquidity => Suite::Liquidity,
            SuiteValue::Trend => Suite::Trend,
        }
    }
}

fn parse_named_source(raw: &str) -> std::result::Result<NamedSource, String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected name=FILE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() || path.trim().is_empty() {
        return Err(format!("Expected name=FILE, got '{raw}'"));
    }
    Ok(NamedSource {
        name: name.to_string(),
        path: PathBuf::from(path.trim()),
    })
}

fn parse_optional_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value {
        Some(raw) => {
            let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("Invalid date format for {raw}. Expected YYYY-MM-DD"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn parse_required_date(raw: &str) -> Result<NaiveDate> {
    parse_optional_date(Some(raw))?
        .with_context(|| format!("Missing date value for {raw}"))
}
