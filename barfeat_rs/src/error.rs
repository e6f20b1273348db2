use chrono::NaiveDate;
use thiserror::Error;

/// Raised while turning a raw table into a [`crate::bars::BarSeries`].
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("no date-like column found (expected one of time, date, timestamp, quotedate); columns: {available:?}")]
    MissingDateColumn { available: Vec<String> },

    #[error("required price column '{column}' not found; columns: {available:?}")]
    MissingPriceColumn {
        column: &'static str,
        available: Vec<String>,
    },

    #[error("date column '{column}' has no parsable values")]
    NoParsableDates { column: String },

    #[error("{count} bars violate the OHLC invariant (first on {first})")]
    InvalidBars { count: usize, first: NaiveDate },
}

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("train window {start}..={end} holds {rows} rows; at least 2 are required")]
    EmptyTrainWindow {
        start: NaiveDate,
        end: NaiveDate,
        rows: usize,
    },

    #[error("target column '{0}' is not present in the feature panel")]
    MissingTarget(String),

    #[error("invalid correlation thresholds: flag={flag}, prune={prune} (need 0 <= flag <= prune <= 1)")]
    InvalidThresholds { flag: f64, prune: f64 },
}
