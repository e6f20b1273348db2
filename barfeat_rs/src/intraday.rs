//! Daily RTH bars rebuilt from minute and hourly bars.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use polars::prelude::*;
use tracing::{info, warn};

use crate::bars::{Bar, BarSeries, float_cells, resolve_columns, string_cells};
use crate::config::IntradayConfig;
use crate::dates::parse_timestamp_cell;
use crate::panel::FeaturePanel;
use crate::storage::{read_csv_frame, write_frame_guarded};

/// Hourly bars are labelled by the end of their hour; 11..=16 covers 10:00-16:00.
const HOURLY_RTH_LABELS: std::ops::RangeInclusive<u32> = 11..=16;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntradayBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Running OHLCV for one day. Open is the first finite open and Close the
/// last finite close; missing highs, lows and volumes are skipped.
#[derive(Clone, Copy, Debug)]
struct DayAggregate {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl Default for DayAggregate {
    fn default() -> Self {
        Self {
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            volume: 0.0,
        }
    }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() { b } else if b.is_nan() { a } else { a.max(b) }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() { b } else if b.is_nan() { a } else { a.min(b) }
}

impl DayAggregate {
    fn push(&mut self, bar: &IntradayBar) {
        if self.open.is_nan() {
            self.open = bar.open;
        }
        self.high = nan_max(self.high, bar.high);
        self.low = nan_min(self.low, bar.low);
        if !bar.close.is_nan() {
            self.close = bar.close;
        }
        if bar.volume.is_finite() {
            self.volume += bar.volume;
        }
    }
}

fn aggregate_by_day<'a>(
    bars: impl Iterator<Item = &'a IntradayBar>,
) -> BTreeMap<NaiveDate, DayAggregate> {
    let mut days: BTreeMap<NaiveDate, DayAggregate> = BTreeMap::new();
    for bar in bars {
        days.entry(bar.timestamp.date()).or_default().push(bar);
    }
    days
}

fn sorted(bars: &[IntradayBar]) -> Vec<IntradayBar> {
    let mut bars = bars.to_vec();
    bars.sort_by_key(|bar| bar.timestamp);
    bars
}

/// Builds one bar per day present in both inputs: 09:30-09:59 minute bars
/// give Open, hourly bars labelled 11..16 give Close, and High, Low and
/// Volume combine both. With `include_extended`, 09:00-09:29 minute bars
/// widen High and Low and add their volume. The result is not re-validated.
pub fn aggregate_rth(
    minute: &[IntradayBar],
    hourly: &[IntradayBar],
    include_extended: bool,
) -> BarSeries {
    let minute = sorted(minute);
    let hourly = sorted(hourly);

    let opening = aggregate_by_day(minute.iter().filter(|bar| {
        bar.timestamp.hour() == 9 && bar.timestamp.minute() >= 30
    }));
    let session = aggregate_by_day(
        hourly
            .iter()
            .filter(|bar| HOURLY_RTH_LABELS.contains(&bar.timestamp.hour())),
    );
    let premarket = if include_extended {
        aggregate_by_day(
            minute
                .iter()
                .filter(|bar| bar.timestamp.hour() == 9 && bar.timestamp.minute() < 30),
        )
    } else {
        BTreeMap::new()
    };

    let mut bars = Vec::with_capacity(opening.len());
    for (date, open_part) in &opening {
        let Some(hour_part) = session.get(date) else {
            continue;
        };
        let mut bar = Bar {
            date: *date,
            open: open_part.open,
            high: nan_max(open_part.high, hour_part.high),
            low: nan_min(open_part.low, hour_part.low),
            close: hour_part.close,
            volume: Some(open_part.volume + hour_part.volume),
        };
        if let Some(pre) = premarket.get(date) {
            bar.high = nan_max(bar.high, pre.high);
            bar.low = nan_min(bar.low, pre.low);
            bar.volume = bar.volume.map(|v| v + pre.volume);
        }
        bars.push(bar);
    }

    let series = BarSeries::from_bars(bars);
    let violations = series.invariant_violations();
    for date in &violations {
        warn!(date = %date, "Aggregated bar violates the OHLC invariant");
    }
    if !violations.is_empty() {
        warn!(count = violations.len(), "Aggregated bars left unvalidated");
    }
    series
}

/// Reads intraday bars; rows whose timestamp does not parse are dropped.
pub fn intraday_bars_from_frame(frame: &DataFrame) -> Result<Vec<IntradayBar>> {
    let names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let columns = resolve_columns(&names)?;
    let stamps = string_cells(frame, &columns.date)?;
    let open = float_cells(frame, &columns.open)?;
    let high = float_cells(frame, &columns.high)?;
    let low = float_cells(frame, &columns.low)?;
    let close = float_cells(frame, &columns.close)?;
    let volume = match &columns.volume {
        Some(name) => float_cells(frame, name)?,
        None => vec![f64::NAN; frame.height()],
    };

    let mut bars = Vec::with_capacity(frame.height());
    let mut dropped = 0usize;
    for (idx, raw) in stamps.iter().enumerate() {
        match raw.as_deref().and_then(parse_timestamp_cell) {
            Some(timestamp) => bars.push(IntradayBar {
                timestamp,
                open: open[idx],
                high: high[idx],
                low: low[idx],
                close: close[idx],
                volume: volume[idx],
            }),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(rows = dropped, "Dropping intraday rows with unparsable timestamps");
    }
    Ok(bars)
}

pub fn bar_series_frame(series: &BarSeries) -> Result<DataFrame> {
    let mut panel = FeaturePanel::new(series.dates().to_vec());
    for (name, values) in series.passthrough_columns() {
        panel.push(name, values)?;
    }
    panel.to_data_frame()
}

pub fn run_aggregate(config: &IntradayConfig) -> Result<PathBuf> {
    config.validate()?;
    let minute = intraday_bars_from_frame(&read_csv_frame(&config.minute_csv)?)
        .with_context(|| format!("Invalid minute bars in {}", config.minute_csv.display()))?;
    let hourly = intraday_bars_from_frame(&read_csv_frame(&config.hourly_csv)?)
        .with_context(|| format!("Invalid hourly bars in {}", config.hourly_csv.display()))?;
    let series = aggregate_rth(&minute, &hourly, config.include_extended);
    info!(
        days = series.len(),
        include_extended = config.include_extended,
        "Aggregated RTH daily bars"
    );
    let mut frame = bar_series_frame(&series)?;
    write_frame_guarded(&mut frame, &config.output_csv, config.ack_new_df)?;
    Ok(config.output_csv.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .expect("valid timestamp")
    }

    fn bar(ts: NaiveDateTime, o: f64, h: f64, l: f64, c: f64, v: f64) -> IntradayBar {
        IntradayBar {
            timestamp: ts,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        }
    }

    fn fixture() -> (Vec<IntradayBar>, Vec<IntradayBar>) {
        let minute = vec![
            bar(at(3, 9, 31), 100.5, 101.0, 100.0, 100.8, 20.0),
            bar(at(3, 9, 30), 100.0, 100.6, 99.5, 100.5, 10.0),
            bar(at(3, 9, 10), 99.0, 103.0, 98.0, 99.5, 5.0),
            // no hourly bars on the 4th: dropped by the inner join
            bar(at(4, 9, 30), 90.0, 91.0, 89.0, 90.5, 1.0),
        ];
        let hourly = vec![
            bar(at(3, 11, 0), 100.8, 102.0, 100.2, 101.5, 100.0),
            bar(at(3, 16, 0), 101.5, 101.9, 100.9, 101.2, f64::NAN),
            bar(at(3, 17, 0), 101.2, 110.0, 80.0, 105.0, 999.0),
        ];
        (minute, hourly)
    }

    #[test]
    fn rth_only_combines_opening_minutes_and_session_hours() {
        let (minute, hourly) = fixture();
        let series = aggregate_rth(&minute, &hourly, false);
        assert_eq!(series.len(), 1);
        let day = series.bar(0).expect("one day");
        assert_eq!(day.open, 100.0, "earliest 09:30 minute open");
        assert_eq!(day.high, 102.0);
        assert_eq!(day.low, 99.5);
        assert_eq!(day.close, 101.2, "16:00 label close");
        assert_eq!(day.volume, Some(130.0));
    }

    #[test]
    fn extended_hours_widen_range_and_add_volume() {
        let (minute, hourly) = fixture();
        let day = aggregate_rth(&minute, &hourly, true).bar(0).expect("one day");
        assert_eq!(day.high, 103.0);
        assert_eq!(day.low, 98.0);
        assert_eq!(day.volume, Some(135.0));
    }

    #[test]
    fn frame_loader_strips_offsets_to_wall_clock() {
        let frame = df!(
            "time" => ["2025-03-03 09:30:00-05:00", "not a time"],
            "open" => [1.0, 2.0],
            "high" => [1.0, 2.0],
            "low" => [1.0, 2.0],
            "close" => [1.0, 2.0],
            "volume" => [5.0, 6.0],
        )
        .expect("frame");
        let bars = intraday_bars_from_frame(&frame).expect("bars");
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, at(3, 9, 30));
    }
}
