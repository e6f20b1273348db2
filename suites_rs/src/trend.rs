//! Momentum, time since extremes, distance from moving averages and
//! return mean-reversion measures.

use anyhow::{Result, bail};
use barfeat_rs::feature::windowed;
use barfeat_rs::ops::{log_returns, pct_change, safe_div, shift, zscore};
use barfeat_rs::rolling::{PairStat, RollingStat, Window, rolling, rolling_pair};
use barfeat_rs::{BarSeries, FeatureDescriptor, FeaturePanel, Formula, Suite};
use once_cell::sync::Lazy;

use crate::indicators::{MA_WINDOWS, ema, simple_returns, sma};

pub const MAX_MOMENTUM: usize = 20;
pub const EXTREME_WINDOWS: [usize; 4] = [20, 60, 120, 252];
pub const ZSCORE_WINDOWS: [usize; 3] = [5, 20, 60];
pub const AUTOCORR_WINDOWS: [usize; 3] = [20, 60, 120];

const fn desc(template: &'static str, formula: Formula) -> FeatureDescriptor {
    FeatureDescriptor::new(Suite::Trend, template, formula)
}

static CATALOG: Lazy<Vec<FeatureDescriptor>> = Lazy::new(|| {
    let momentum: Vec<usize> = (1..=MAX_MOMENTUM).collect();
    let mut catalog = vec![
        desc("ret_1d", Formula::SimpleReturn),
        desc("logret_1d", Formula::LogReturn),
    ];
    catalog.extend(windowed(desc("mom_{n}d", Formula::Momentum), &momentum));
    for w in EXTREME_WINDOWS {
        catalog.extend([
            desc("days_since_high_{n}d", Formula::DaysSinceHigh).with_window(w),
            desc("days_since_low_{n}d", Formula::DaysSinceLow).with_window(w),
        ]);
    }
    for n in MA_WINDOWS {
        catalog.extend([
            desc("dist_sma_{n}d", Formula::DistanceFromSma).with_window(n),
            desc("dist_ema_{n}d", Formula::DistanceFromEma).with_window(n),
        ]);
    }
    catalog.extend(windowed(
        desc("zret_{n}d", Formula::ReturnZScore),
        &ZSCORE_WINDOWS,
    ));
    catalog.extend(windowed(
        desc("autocorr_ret_lag1_{n}d", Formula::ReturnAutocorrelation),
        &AUTOCORR_WINDOWS,
    ));
    catalog
});

pub fn catalog() -> &'static [FeatureDescriptor] {
    &CATALOG
}

/// `(Close - MA) / MA`, missing where the average is zero.
pub fn distance_from(close: &[f64], average: &[f64]) -> Vec<f64> {
    close
        .iter()
        .zip(average.iter())
        .map(|(c, ma)| safe_div(c - ma, *ma))
        .collect()
}

pub fn return_zscore(logret: &[f64], window: usize) -> Vec<f64> {
    let strict = Window::strict(window);
    let mean = rolling(logret, strict, RollingStat::Mean);
    let std = rolling(logret, strict, RollingStat::POPULATION_STD);
    zscore(logret, &mean, &std)
}

/// Lag-1 autocorrelation of the last `window` returns: the correlation of
/// each return with its predecessor over the `window - 1` adjacent pairs.
pub fn lag1_autocorrelation(logret: &[f64], window: usize) -> Vec<f64> {
    let previous = shift(logret, 1);
    let pairs = Window::strict(window.saturating_sub(1).max(1));
    rolling_pair(logret, &previous, pairs, PairStat::Corr)
}

pub fn compute(bars: &BarSeries) -> Result<FeaturePanel> {
    let (high, low, close) = (bars.high(), bars.low(), bars.close());
    let logret = log_returns(close);

    let mut panel = FeaturePanel::new(bars.dates().to_vec());
    for descriptor in catalog() {
        let n = descriptor.window_or_one();
        let values = match descriptor.formula {
            Formula::SimpleReturn => simple_returns(close),
            Formula::LogReturn => logret.clone(),
            Formula::Momentum => pct_change(close, n),
            Formula::DaysSinceHigh => rolling(high, Window::strict(n), RollingStat::BarsSinceMax),
            Formula::DaysSinceLow => rolling(low, Window::strict(n), RollingStat::BarsSinceMin),
            Formula::DistanceFromSma => distance_from(close, &sma(close, n)),
            Formula::DistanceFromEma => distance_from(close, &ema(close, n)),
            Formula::ReturnZScore => return_zscore(&logret, n),
            Formula::ReturnAutocorrelation => lag1_autocorrelation(&logret, n),
            other => bail!("{other:?} is not a trend formula"),
        };
        panel.push(descriptor.name(), values)?;
    }
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_since_extremes_prefer_earliest_tie() {
        let high = [5.0, 9.0, 9.0, 4.0];
        let since = rolling(&high, Window::strict(3), RollingStat::BarsSinceMax);
        assert!(since[1].is_nan());
        assert_eq!(since[2], 1.0);
        assert_eq!(since[3], 2.0);
    }

    #[test]
    fn distance_is_missing_on_zero_average() {
        let out = distance_from(&[10.0, 11.0], &[0.0, 10.0]);
        assert!(out[0].is_nan());
        assert!((out[1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn autocorrelation_of_alternating_returns_is_negative_one() {
        let logret: Vec<f64> = std::iter::once(f64::NAN)
            .chain((1..30).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }))
            .collect();
        let ac = lag1_autocorrelation(&logret, 20);
        assert!(ac[19].is_nan(), "window still holds the missing first return");
        assert!((ac[20] + 1.0).abs() < 1e-9, "got {}", ac[20]);
    }

    #[test]
    fn autocorrelation_is_missing_on_constant_returns() {
        let logret = vec![0.01; 30];
        let ac = lag1_autocorrelation(&logret, 20);
        assert!(ac.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn zscore_is_missing_on_flat_returns() {
        let z = return_zscore(&[0.0; 10], 5);
        assert!(z.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn catalog_lists_twenty_momentum_columns() {
        let names: Vec<String> = catalog().iter().map(FeatureDescriptor::name).collect();
        assert_eq!(names[2], "mom_1d");
        assert_eq!(names[21], "mom_20d");
        assert_eq!(names[22], "days_since_high_20d");
        assert_eq!(names.last().map(String::as_str), Some("autocorr_ret_lag1_120d"));
    }
}
