//! Overnight/intraday return decomposition and gap-fill rates.

use anyhow::{Result, bail};
use barfeat_rs::ops::{flag, safe_div, safe_ln, shift};
use barfeat_rs::rolling::{RollingStat, Window, rolling};
use barfeat_rs::{BarSeries, FeatureDescriptor, FeaturePanel, Formula, Suite};
use once_cell::sync::Lazy;

pub const FILL_RATE_WINDOWS: [usize; 4] = [20, 60, 120, 252];

const fn desc(template: &'static str, formula: Formula) -> FeatureDescriptor {
    FeatureDescriptor::new(Suite::Gaps, template, formula)
}

static CATALOG: Lazy<Vec<FeatureDescriptor>> = Lazy::new(|| {
    let mut catalog = vec![
        desc("prev_Close", Formula::PreviousClose),
        desc("gap_abs", Formula::GapAbsolute),
        desc("gap_pct", Formula::GapPercent),
        desc("gap_log", Formula::GapLog),
        desc("overnight_ret", Formula::OvernightReturn),
        desc("overnight_logret", Formula::OvernightLogReturn),
        desc("intraday_ret", Formula::IntradayReturn),
        desc("intraday_logret", Formula::IntradayLogReturn),
        desc("daily_ret", Formula::DailyReturn),
        desc("daily_logret", Formula::DailyLogReturn),
        desc("is_gap", Formula::GapAny).flag(),
        desc("is_gap_up", Formula::GapUp).flag(),
        desc("is_gap_down", Formula::GapDown).flag(),
        desc("gap_filled", Formula::GapFilled).flag(),
    ];
    for w in FILL_RATE_WINDOWS {
        catalog.extend([
            desc("p_fill_any_{n}d", Formula::FillRateAny).with_window(w),
            desc("p_fill_up_{n}d", Formula::FillRateUp).with_window(w),
            desc("p_fill_down_{n}d", Formula::FillRateDown).with_window(w),
        ]);
    }
    catalog
});

pub fn catalog() -> &'static [FeatureDescriptor] {
    &CATALOG
}

/// Per-row gap classification. Every flag is missing on rows where Open or
/// the previous Close is.
#[derive(Clone, Debug)]
pub struct GapFlags {
    pub any: Vec<f64>,
    pub up: Vec<f64>,
    pub down: Vec<f64>,
    pub filled: Vec<f64>,
}

pub fn classify_gaps(open: &[f64], high: &[f64], low: &[f64], prev_close: &[f64]) -> GapFlags {
    let len = open.len();
    let mut flags = GapFlags {
        any: Vec::with_capacity(len),
        up: Vec::with_capacity(len),
        down: Vec::with_capacity(len),
        filled: Vec::with_capacity(len),
    };
    for i in 0..len {
        let (o, pc) = (open[i], prev_close[i]);
        let defined = o.is_finite() && pc.is_finite();
        let up = o > pc;
        let down = o < pc;
        let filled = (up && low[i] <= pc) || (down && high[i] >= pc);
        flags.any.push(flag(defined, up || down));
        flags.up.push(flag(defined, up));
        flags.down.push(flag(defined, down));
        flags.filled.push(flag(defined, filled));
    }
    flags
}

fn is_set(value: f64) -> bool {
    value == 1.0
}

/// Share of `condition` gaps in the trailing window that were filled. Any
/// partial window counts, but an empty denominator stays missing.
pub fn fill_rate(condition: &[f64], filled: &[f64], window: usize) -> Vec<f64> {
    let hits: Vec<f64> = condition
        .iter()
        .zip(filled.iter())
        .map(|(c, f)| if is_set(*c) && is_set(*f) { 1.0 } else { 0.0 })
        .collect();
    let events: Vec<f64> = condition
        .iter()
        .map(|c| if is_set(*c) { 1.0 } else { 0.0 })
        .collect();
    let window = Window::strict(window).with_min_periods(1);
    let hit_sums = rolling(&hits, window, RollingStat::Sum);
    let event_sums = rolling(&events, window, RollingStat::Sum);
    hit_sums
        .iter()
        .zip(event_sums.iter())
        .map(|(h, e)| if *e > 0.0 { h / e } else { f64::NAN })
        .collect()
}

fn log_ratio(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| safe_ln(*x) - safe_ln(*y))
        .collect()
}

fn simple_ratio(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| safe_div(*x, *y) - 1.0)
        .collect()
}

pub fn compute(bars: &BarSeries) -> Result<FeaturePanel> {
    let (open, high, low, close) = (bars.open(), bars.high(), bars.low(), bars.close());
    let prev_close = shift(close, 1);
    let gap_abs: Vec<f64> = open
        .iter()
        .zip(prev_close.iter())
        .map(|(o, pc)| o - pc)
        .collect();
    let flags = classify_gaps(open, high, low, &prev_close);

    let mut panel = FeaturePanel::new(bars.dates().to_vec());
    for descriptor in catalog() {
        let n = descriptor.window_or_one();
        let values = match descriptor.formula {
            Formula::PreviousClose => prev_close.clone(),
            Formula::GapAbsolute => gap_abs.clone(),
            Formula::GapPercent => gap_abs
                .iter()
                .zip(prev_close.iter())
                .map(|(g, pc)| safe_div(*g, *pc))
                .collect(),
            Formula::GapLog | Formula::OvernightLogReturn => log_ratio(open, &prev_close),
            Formula::OvernightReturn => simple_ratio(open, &prev_close),
            Formula::IntradayReturn => simple_ratio(close, open),
            Formula::IntradayLogReturn => log_ratio(close, open),
            Formula::DailyReturn => simple_ratio(close, &prev_close),
            Formula::DailyLogReturn => log_ratio(close, &prev_close),
            Formula::GapAny => flags.any.clone(),
            Formula::GapUp => flags.up.clone(),
            Formula::GapDown => flags.down.clone(),
            Formula::GapFilled => flags.filled.clone(),
            Formula::FillRateAny => fill_rate(&flags.any, &flags.filled, n),
            Formula::FillRateUp => fill_rate(&flags.up, &flags.filled, n),
            Formula::FillRateDown => fill_rate(&flags.down, &flags.filled, n),
            other => bail!("{other:?} is not a gap formula"),
        };
        panel.push(descriptor.name(), values)?;
    }
    Ok(panel)
}
