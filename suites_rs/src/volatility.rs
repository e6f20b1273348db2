//! Close-to-close and range-based volatility estimators, annualized with
//! 252 trading days, plus range and return-shape features.

use std::f64::consts::LN_2;

use anyhow::{Result, bail};
use barfeat_rs::feature::windowed;
use barfeat_rs::ops::{log_returns, safe_div, safe_ln, safe_sqrt};
use barfeat_rs::rolling::{RollingStat, Window, rolling};
use barfeat_rs::{BarSeries, FeatureDescriptor, FeaturePanel, Formula, Suite};
use once_cell::sync::Lazy;

pub const TRADING_DAYS: f64 = 252.0;
pub const VOL_WINDOWS: [usize; 6] = [5, 10, 20, 60, 120, 252];
pub const SHAPE_WINDOWS: [usize; 3] = [20, 60, 120];

const fn desc(template: &'static str, formula: Formula) -> FeatureDescriptor {
    FeatureDescriptor::new(Suite::Volatility, template, formula)
}

static CATALOG: Lazy<Vec<FeatureDescriptor>> = Lazy::new(|| {
    let mut catalog = Vec::new();
    for (template, formula) in [
        ("RealizedVol_{n}d_ann", Formula::RealizedVolatility),
        ("ParkinsonVol_{n}d_ann", Formula::ParkinsonVolatility),
        ("GarmanKlassVol_{n}d_ann", Formula::GarmanKlassVolatility),
        ("RogersSatchellVol_{n}d_ann", Formula::RogersSatchellVolatility),
    ] {
        catalog.extend(windowed(desc(template, formula), &VOL_WINDOWS));
    }
    catalog.extend([
        desc("Range_abs", Formula::RangeAbsolute),
        desc("Range_rel_close", Formula::RangeRelative),
        desc("Range_log", Formula::RangeLog),
    ]);
    for w in SHAPE_WINDOWS {
        catalog.extend([
            desc("RealizedSkew_{n}d", Formula::RealizedSkew).with_window(w),
            desc("RealizedKurtExcess_{n}d", Formula::RealizedExcessKurtosis).with_window(w),
        ]);
    }
    catalog
});

pub fn catalog() -> &'static [FeatureDescriptor] {
    &CATALOG
}

fn log_ratio(a: f64, b: f64) -> f64 {
    safe_ln(a) - safe_ln(b)
}

/// `(ln(H/L))^2 / (4 ln 2)`.
pub fn parkinson_variance(high: &[f64], low: &[f64]) -> Vec<f64> {
    high.iter()
        .zip(low.iter())
        .map(|(h, l)| log_ratio(*h, *l).powi(2) / (4.0 * LN_2))
        .collect()
}

/// `0.5 (ln(H/L))^2 - (2 ln 2 - 1)(ln(C/O))^2`; may be negative.
pub fn garman_klass_variance(open: &[f64], high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..close.len())
        .map(|i| {
            0.5 * log_ratio(high[i], low[i]).powi(2)
                - (2.0 * LN_2 - 1.0) * log_ratio(close[i], open[i]).powi(2)
        })
        .collect()
}

/// `ln(H/C) ln(H/O) + ln(L/C) ln(L/O)`.
pub fn rogers_satchell_variance(
    open: &[f64],
    high: &[f64],
    low: &[f64],
    close: &[f64],
) -> Vec<f64> {
    (0..close.len())
        .map(|i| {
            log_ratio(high[i], close[i]) * log_ratio(high[i], open[i])
                + log_ratio(low[i], close[i]) * log_ratio(low[i], open[i])
        })
        .collect()
}

/// `sqrt(252 * mean(v))` over a strict window; a negative mean is missing.
pub fn annualized_from_variance(daily_variance: &[f64], window: usize) -> Vec<f64> {
    rolling(daily_variance, Window::strict(window), RollingStat::Mean)
        .into_iter()
        .map(|mean| safe_sqrt(TRADING_DAYS * mean))
        .collect()
}

pub fn realized_volatility(logret: &[f64], window: usize) -> Vec<f64> {
    let scale = TRADING_DAYS.sqrt();
    rolling(logret, Window::strict(window), RollingStat::POPULATION_STD)
        .into_iter()
        .map(|std| scale * std)
        .collect()
}

pub fn compute(bars: &BarSeries) -> Result<FeaturePanel> {
    let (open, high, low, close) = (bars.open(), bars.high(), bars.low(), bars.close());
    let logret = log_returns(close);
    let parkinson = parkinson_variance(high, low);
    let garman_klass = garman_klass_variance(open, high, low, close);
    let rogers_satchell = rogers_satchell_variance(open, high, low, close);

    let mut panel = FeaturePanel::new(bars.dates().to_vec());
    for descriptor in catalog() {
        let n = descriptor.window_or_one();
        let values = match descriptor.formula {
            Formula::RealizedVolatility => realized_volatility(&logret, n),
            Formula::ParkinsonVolatility => annualized_from_variance(&parkinson, n),
            Formula::GarmanKlassVolatility => annualized_from_variance(&garman_klass, n),
            Formula::RogersSatchellVolatility => annualized_from_variance(&rogers_satchell, n),
            Formula::RangeAbsolute => high.iter().zip(low.iter()).map(|(h, l)| h - l).collect(),
            Formula::RangeRelative => (0..close.len())
                .map(|i| safe_div(high[i] - low[i], close[i]))
                .collect(),
            Formula::RangeLog => high
                .iter()
                .zip(low.iter())
                .map(|(h, l)| log_ratio(*h, *l))
                .collect(),
            Formula::RealizedSkew => rolling(&logret, Window::strict(n), RollingStat::Skew),
            Formula::RealizedExcessKurtosis => {
                rolling(&logret, Window::strict(n), RollingStat::Kurt)
            }
            other => bail!("{other:?} is not a volatility formula"),
        };
        panel.push(descriptor.name(), values)?;
    }
    Ok(panel)
}
