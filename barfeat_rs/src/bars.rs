use anyhow::{Context, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::dates::{detect_date_column, parse_date_column};
use crate::error::SchemaError;

/// One trading day.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl Bar {
    /// High must bound Open, Close and Low from above and Low must bound them
    /// from below. Missing prices never count as a violation.
    pub fn violates_invariant(&self) -> bool {
        let upper = self.open.max(self.close).max(self.low);
        let lower = self.open.min(self.close).min(self.high);
        self.high < upper || self.low > lower
    }
}

/// Canonical daily series: strictly increasing unique dates, columnar prices.
#[derive(Clone, Debug, PartialEq)]
pub struct BarSeries {
    dates: Vec<NaiveDate>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Option<Vec<f64>>,
}

impl BarSeries {
    /// Sorts by date (stable) and keeps the first occurrence of each date.
    pub fn from_bars(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|bar| bar.date);
        let before = bars.len();
        bars.dedup_by_key(|bar| bar.date);
        let dropped = before - bars.len();
        if dropped > 0 {
            warn!(dropped, "Duplicate dates found; keeping first occurrence per date");
        }

        let has_volume = bars.iter().any(|bar| bar.volume.is_some());
        let mut series = Self {
            dates: Vec::with_capacity(bars.len()),
            open: Vec::with_capacity(bars.len()),
            high: Vec::with_capacity(bars.len()),
            low: Vec::with_capacity(bars.len()),
            close: Vec::with_capacity(bars.len()),
            volume: has_volume.then(|| Vec::with_capacity(bars.len())),
        };
        for bar in bars {
            series.dates.push(bar.date);
            series.open.push(bar.open);
            series.high.push(bar.high);
            series.low.push(bar.low);
            series.close.push(bar.close);
            if let Some(volume) = series.volume.as_mut() {
                volume.push(bar.volume.unwrap_or(f64::NAN));
            }
        }
        series
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> Option<&[f64]> {
        self.volume.as_deref()
    }

    /// Volume with missing entries (or a missing column) as NaN.
    pub fn volume_or_nan(&self) -> Vec<f64> {
        match &self.volume {
            Some(volume) => volume.clone(),
            None => vec![f64::NAN; self.len()],
        }
    }

    pub fn bar(&self, idx: usize) -> Option<Bar> {
        (idx < self.len()).then(|| Bar {
            date: self.dates[idx],
            open: self.open[idx],
            high: self.high[idx],
            low: self.low[idx],
            close: self.close[idx],
            volume: self.volume.as_ref().map(|v| v[idx]),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Bar> + '_ {
        (0..self.len()).filter_map(move |idx| self.bar(idx))
    }

    pub fn invariant_violations(&self) -> Vec<NaiveDate> {
        self.iter()
            .filter(Bar::violates_invariant)
            .map(|bar| bar.date)
            .collect()
    }

    /// Passthrough columns in output order: Open, High, Low, Close[, Volume].
    pub fn passthrough_columns(&self) -> Vec<(&'static str, Vec<f64>)> {
        let mut columns = vec![
            ("Open", self.open.clone()),
            ("High", self.high.clone()),
            ("Low", self.low.clone()),
            ("Close", self.close.clone()),
        ];
        if let Some(volume) = &self.volume {
            columns.push(("Volume", volume.clone()));
        }
        columns
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NormalizeOptions {
    /// Fail instead of warning when bars violate the OHLC invariant.
    pub reject_invalid_bars: bool,
}

/// Source column names resolved from a raw frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: Option<String>,
}

fn find_column(names: &[String], wanted: &str) -> Option<String> {
    names
        .iter()
        .find(|name| name.trim().eq_ignore_ascii_case(wanted))
        .cloned()
}

pub fn resolve_columns(names: &[String]) -> Result<ColumnMap, SchemaError> {
    let date = detect_date_column(names.iter().map(String::as_str)).ok_or_else(|| {
        SchemaError::MissingDateColumn {
            available: names.to_vec(),
        }
    })?;
    let required = |column: &'static str| {
        find_column(names, column).ok_or_else(|| SchemaError::MissingPriceColumn {
            column,
            available: names.to_vec(),
        })
    };
    Ok(ColumnMap {
        date,
        open: required("open")?,
        high: required("high")?,
        low: required("low")?,
        close: required("close")?,
        volume: find_column(names, "volume"),
    })
}

pub fn string_cells(frame: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = frame
        .column(name)
        .with_context(|| format!("Missing column '{name}'"))?
        .cast(&DataType::String)
        .with_context(|| format!("Failed to read column '{name}' as text"))?;
    let chunked = series
        .str()
        .with_context(|| format!("Failed to interpret column '{name}' as text"))?;
    Ok(chunked
        .into_iter()
        .map(|cell| cell.map(|raw| raw.trim().to_string()))
        .collect())
}

/// Numeric view of a column; unparsable or null cells become NaN.
pub fn float_cells(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = frame
        .column(name)
        .with_context(|| format!("Missing column '{name}'"))?
        .cast(&DataType::Float64)
        .with_context(|| format!("Failed to cast column '{name}' to float"))?;
    let chunked = series
        .f64()
        .with_context(|| format!("Failed to interpret column '{name}' as float"))?;
    Ok(chunked
        .into_iter()
        .map(|cell| cell.unwrap_or(f64::NAN))
        .collect())
}

/// Validates and canonicalises a raw bar table.
pub fn normalize_frame(frame: &DataFrame, options: NormalizeOptions) -> Result<BarSeries> {
    let names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let columns = resolve_columns(&names)?;
    debug!(?columns, "Resolved bar columns");

    let raw_dates = string_cells(frame, &columns.date)?;
    let dates = parse_date_column(&raw_dates);
    if dates.iter().all(Option::is_none) {
        return Err(SchemaError::NoParsableDates {
            column: columns.date.clone(),
        }
        .into());
    }

    let open = float_cells(frame, &columns.open)?;
    let high = float_cells(frame, &columns.high)?;
    let low = float_cells(frame, &columns.low)?;
    let close = float_cells(frame, &columns.close)?;
    let volume = match &columns.volume {
        Some(name) => Some(float_cells(frame, name)?),
        None => None,
    };

    let mut unparsed = 0usize;
    let mut bars = Vec::with_capacity(frame.height());
    for (idx, date) in dates.into_iter().enumerate() {
        let Some(date) = date else {
            unparsed += 1;
            continue;
        };
        bars.push(Bar {
            date,
            open: open[idx],
            high: high[idx],
            low: low[idx],
            close: close[idx],
            volume: volume.as_ref().map(|v| v[idx]),
        });
    }
    if unparsed > 0 {
        warn!(
            rows = unparsed,
            column = %columns.date,
            "Dropping rows with unparsable dates"
        );
    }

    let series = BarSeries::from_bars(bars);
    let violations = series.invariant_violations();
    if let Some(&first) = violations.first() {
        if options.reject_invalid_bars {
            return Err(SchemaError::InvalidBars {
                count: violations.len(),
                first,
            }
            .into());
        }
        warn!(
            count = violations.len(),
            first = %first,
            "Bars violate the OHLC invariant; values are used as-is"
        );
    }

    info!(
        rows = series.len(),
        has_volume = series.volume().is_some(),
        "Normalized bar series"
    );
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    fn bar(d: u32, close: f64) -> Bar {
        Bar {
            date: day(d),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: None,
        }
    }

    #[test]
    fn from_bars_sorts_and_keeps_first_duplicate() {
        let series = BarSeries::from_bars(vec![bar(3, 30.0), bar(2, 20.0), bar(3, 99.0)]);
        assert_eq!(series.dates(), &[day(2), day(3)]);
        assert_eq!(series.close(), &[20.0, 30.0]);
        assert!(series.volume().is_none());
    }

    #[test]
    fn invariant_check_ignores_missing_prices() {
        let mut broken = bar(2, 10.0);
        broken.high = 9.0;
        assert!(broken.violates_invariant());
        let mut missing = bar(3, 10.0);
        missing.high = f64::NAN;
        assert!(!missing.violates_invariant());
    }

    #[test]
    fn resolve_columns_is_case_insensitive() {
        let names: Vec<String> = ["Date", "OPEN", "High", "low", "Close", "Volume"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let map = resolve_columns(&names).expect("columns resolve");
        assert_eq!(map.open, "OPEN");
        assert_eq!(map.volume.as_deref(), Some("Volume"));
    }

    #[test]
    fn normalize_rejects_invalid_bars_when_requested() {
        let frame = df!(
            "date" => ["2024-01-02", "2024-01-03"],
            "open" => [10.0, 10.0],
            "high" => [11.0, 9.0],
            "low" => [9.0, 8.0],
            "close" => [10.5, 10.0],
        )
        .expect("frame");
        let series = normalize_frame(&frame, NormalizeOptions::default()).expect("warns only");
        assert_eq!(series.len(), 2);

        let err = normalize_frame(
            &frame,
            NormalizeOptions {
                reject_invalid_bars: true,
            },
        )
        .expect_err("invalid bars rejected");
        assert_eq!(
            err.downcast_ref::<SchemaError>(),
            Some(&SchemaError::InvalidBars {
                count: 1,
                first: day(3)
            })
        );
    }
}
