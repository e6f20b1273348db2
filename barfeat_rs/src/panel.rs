use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, warn};

use crate::bars::{float_cells, string_cells};
use crate::dates::{detect_date_column, format_date, parse_date_column};

/// Date-keyed set of named feature columns. Missing values are NaN.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeaturePanel {
    dates: Vec<NaiveDate>,
    columns: Vec<(String, Vec<f64>)>,
}

impl FeaturePanel {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: Vec::new(),
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn height(&self) -> usize {
        self.dates.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> + '_ {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Appends a column. Returns `false` and leaves the panel untouched when a
    /// column with the same name already exists.
    pub fn push(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<bool> {
        let name = name.into();
        if values.len() != self.dates.len() {
            bail!(
                "Column '{name}' has {} rows but the panel has {}",
                values.len(),
                self.dates.len()
            );
        }
        if self.contains(&name) {
            return Ok(false);
        }
        self.columns.push((name, values));
        Ok(true)
    }

    /// Left-joins `other` onto this panel's dates. Columns already present
    /// keep their existing values; the number of skipped duplicates is
    /// returned.
    pub fn left_join(&mut self, other: &FeaturePanel) -> usize {
        let mut positions: AHashMap<NaiveDate, usize> = AHashMap::with_capacity(other.height());
        for (idx, date) in other.dates.iter().enumerate() {
            positions.entry(*date).or_insert(idx);
        }
        let lookup: Vec<Option<usize>> = self
            .dates
            .iter()
            .map(|date| positions.get(date).copied())
            .collect();

        let mut existing: AHashSet<String> =
            self.columns.iter().map(|(name, _)| name.clone()).collect();
        let mut skipped = 0usize;
        for (name, values) in &other.columns {
            if !existing.insert(name.clone()) {
                skipped += 1;
                debug!(column = %name, "Skipping duplicate column during join");
                continue;
            }
            let joined = lookup
                .iter()
                .map(|row| row.map(|idx| values[idx]).unwrap_or(f64::NAN))
                .collect();
            self.columns.push((name.clone(), joined));
        }
        skipped
    }

    /// Keeps rows whose date satisfies `keep`.
    pub fn retain_dates(&mut self, mut keep: impl FnMut(NaiveDate) -> bool) {
        let mask: Vec<bool> = self.dates.iter().map(|date| keep(*date)).collect();
        self.retain_rows(&mask);
    }

    pub fn retain_rows(&mut self, mask: &[bool]) {
        let filter = |values: &Vec<f64>| -> Vec<f64> {
            values
                .iter()
                .zip(mask.iter())
                .filter_map(|(v, keep)| keep.then_some(*v))
                .collect()
        };
        self.dates = self
            .dates
            .iter()
            .zip(mask.iter())
            .filter_map(|(d, keep)| keep.then_some(*d))
            .collect();
        for (_, values) in self.columns.iter_mut() {
            *values = filter(values);
        }
    }

    pub fn retain_columns(&mut self, mut keep: impl FnMut(&str, &[f64]) -> bool) {
        self.columns.retain(|(name, values)| keep(name, values));
    }

    pub fn prefix_columns(&mut self, prefix: &str) {
        for (name, _) in self.columns.iter_mut() {
            *name = format!("{prefix}_{name}");
        }
    }

    pub fn map_column(&mut self, name: &str, f: impl FnOnce(&[f64]) -> Vec<f64>) -> bool {
        match self.columns.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, values)) => {
                *values = f(values);
                true
            }
            None => false,
        }
    }

    /// Renders the panel with a leading ISO `Date` column; non-finite values
    /// become nulls.
    pub fn to_data_frame(&self) -> Result<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len() + 1);
        let dates: Vec<String> = self.dates.iter().map(|d| format_date(*d)).collect();
        series.push(Series::new("Date", dates));
        for (name, values) in &self.columns {
            let cells: Vec<Option<f64>> = values
                .iter()
                .map(|v| v.is_finite().then_some(*v))
                .collect();
            series.push(Series::new(name, cells));
        }
        DataFrame::new(series).context("Failed to assemble feature panel frame")
    }

    /// Reads a panel back from a frame with a date-like key column. Rows with
    /// unparsable dates are dropped and the first row per date wins.
    pub fn from_data_frame(frame: &DataFrame) -> Result<Self> {
        let names: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let date_column = detect_date_column(names.iter().map(String::as_str))
            .with_context(|| format!("No date column found in panel; columns: {names:?}"))?;
        let raw_dates = string_cells(frame, &date_column)?;
        let parsed = parse_date_column(&raw_dates);

        let mut seen = AHashSet::with_capacity(parsed.len());
        let mask: Vec<bool> = parsed
            .iter()
            .map(|date| matches!(date, Some(d) if seen.insert(*d)))
            .collect();
        let dropped = mask.iter().filter(|keep| !**keep).count();
        if dropped > 0 {
            warn!(rows = dropped, "Dropping panel rows with unparsable or repeated dates");
        }

        let mut order: Vec<usize> = (0..parsed.len()).filter(|idx| mask[*idx]).collect();
        order.sort_by_key(|idx| parsed[*idx]);
        let dates = order.iter().filter_map(|idx| parsed[*idx]).collect();
        let mut panel = Self::new(dates);
        for name in names.iter().filter(|name| **name != date_column) {
            let values = float_cells(frame, name)?;
            let values = order.iter().map(|idx| values[*idx]).collect();
            panel.push(name.clone(), values)?;
        }
        Ok(panel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).expect("valid date")
    }

    #[test]
    fn push_rejects_length_mismatch_and_skips_duplicates() {
        let mut panel = FeaturePanel::new(vec![day(1), day(2)]);
        assert!(panel.push("a", vec![1.0, 2.0]).expect("fits"));
        assert!(!panel.push("a", vec![3.0, 4.0]).expect("fits"));
        assert_eq!(panel.column("a"), Some(&[1.0, 2.0][..]));
        assert!(panel.push("b", vec![1.0]).is_err());
    }

    #[test]
    fn left_join_aligns_on_master_calendar() {
        let mut master = FeaturePanel::new(vec![day(1), day(2), day(5)]);
        master.push("x", vec![1.0, 2.0, 3.0]).expect("push");
        let mut other = FeaturePanel::new(vec![day(5), day(1), day(9)]);
        other.push("y", vec![50.0, 10.0, 90.0]).expect("push");
        other.push("x", vec![0.0, 0.0, 0.0]).expect("push");

        let skipped = master.left_join(&other);
        assert_eq!(skipped, 1);
        let y = master.column("y").expect("joined");
        assert_eq!(y[0], 10.0);
        assert!(y[1].is_nan());
        assert_eq!(y[2], 50.0);
        assert_eq!(master.column("x"), Some(&[1.0, 2.0, 3.0][..]));
    }

    #[test]
    fn frame_round_trip_keeps_nulls_and_order() {
        let mut panel = FeaturePanel::new(vec![day(1), day(2)]);
        panel.push("f", vec![f64::NAN, 2.5]).expect("push");
        let frame = panel.to_data_frame().expect("frame");
        assert_eq!(frame.column("f").expect("column").null_count(), 1);
        let back = FeaturePanel::from_data_frame(&frame).expect("parse back");
        assert_eq!(back.dates(), panel.dates());
        assert!(back.column("f").expect("f")[0].is_nan());
    }

    #[test]
    fn retain_dates_filters_every_column() {
        let mut panel = FeaturePanel::new(vec![day(1), day(2), day(3)]);
        panel.push("f", vec![1.0, 2.0, 3.0]).expect("push");
        panel.retain_dates(|d| d >= day(2));
        assert_eq!(panel.dates(), &[day(2), day(3)]);
        assert_eq!(panel.column("f"), Some(&[2.0, 3.0][..]));
    }
}
