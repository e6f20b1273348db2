//! Returns, moving averages and oscillators from Close (plus High/Low where
//! noted). Every series is causal.

use anyhow::{Result, bail};
use barfeat_rs::ewm::Ewm;
use barfeat_rs::feature::windowed;
use barfeat_rs::ops::{diff, log_returns, pct_change, safe_div, shift, zip_map};
use barfeat_rs::rolling::{RollingStat, Window, rolling};
use barfeat_rs::{BarSeries, FeatureDescriptor, FeaturePanel, Formula, Suite};
use once_cell::sync::Lazy;

pub const RETURN_WINDOWS: [usize; 3] = [5, 10, 20];
pub const MA_WINDOWS: [usize; 5] = [5, 10, 20, 50, 200];
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const RSI_PERIOD: usize = 14;
pub const STOCH_K: usize = 14;
pub const STOCH_D: usize = 3;
pub const BB_PERIOD: usize = 20;
pub const BB_NUM_STD: f64 = 2.0;
pub const ATR_PERIOD: usize = 14;

const fn desc(template: &'static str, formula: Formula) -> FeatureDescriptor {
    FeatureDescriptor::new(Suite::Indicators, template, formula)
}

static CATALOG: Lazy<Vec<FeatureDescriptor>> = Lazy::new(|| {
    let mut catalog = vec![
        desc("ret_1d", Formula::SimpleReturn),
        desc("logret_1d", Formula::LogReturn),
    ];
    catalog.extend(windowed(
        desc("roll_ret_{n}d", Formula::CompoundedReturn),
        &RETURN_WINDOWS,
    ));
    catalog.extend(windowed(
        desc("SMA_{n}", Formula::SimpleMovingAverage),
        &MA_WINDOWS,
    ));
    catalog.extend(windowed(
        desc("EMA_{n}", Formula::ExponentialMovingAverage),
        &MA_WINDOWS,
    ));
    catalog.extend([
        desc("MACD_line", Formula::MacdLine),
        desc("MACD_signal", Formula::MacdSignal),
        desc("MACD_hist", Formula::MacdHistogram),
        desc("RSI_{n}", Formula::RelativeStrength).with_window(RSI_PERIOD),
        desc("Stoch_%K_{n}", Formula::StochasticK).with_window(STOCH_K),
        desc("Stoch_%D_{n}", Formula::StochasticD).with_window(STOCH_D),
        desc("BB_Middle_{n}", Formula::BollingerMiddle).with_window(BB_PERIOD),
        desc("BB_Upper_{n}_2", Formula::BollingerUpper).with_window(BB_PERIOD),
        desc("BB_Lower_{n}_2", Formula::BollingerLower).with_window(BB_PERIOD),
        desc("BB_Width_{n}", Formula::BollingerWidth).with_window(BB_PERIOD),
        desc("ATR_{n}", Formula::AverageTrueRange).with_window(ATR_PERIOD),
    ]);
    catalog
});

pub fn catalog() -> &'static [FeatureDescriptor] {
    &CATALOG
}

pub fn simple_returns(close: &[f64]) -> Vec<f64> {
    pct_change(close, 1)
}

/// Arithmetic mean of the last `n` closes.
pub fn sma(close: &[f64], n: usize) -> Vec<f64> {
    rolling(close, Window::strict(n), RollingStat::Mean)
}

/// Span-`n` recursive exponential mean, null for the first `n - 1` rows.
pub fn ema(close: &[f64], n: usize) -> Vec<f64> {
    Ewm::span(n).mean(close)
}

/// Compounded return over `n` one-day returns. A growth factor of exactly
/// zero is treated as one.
pub fn compounded_return(close: &[f64], n: usize) -> Vec<f64> {
    let growth: Vec<f64> = simple_returns(close)
        .iter()
        .map(|r| {
            let factor = 1.0 + r;
            if factor == 0.0 { 1.0 } else { factor }
        })
        .collect();
    rolling(&growth, Window::strict(n), RollingStat::Product)
        .into_iter()
        .map(|p| p - 1.0)
        .collect()
}

#[derive(Clone, Debug)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub hist: Vec<f64>,
}

/// Both EMAs are held back until `slow` observations; the signal line needs
/// `slow + signal - 1` valid line values.
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = Ewm::span(fast).with_min_periods(slow).mean(close);
    let slow_ema = Ewm::span(slow).mean(close);
    let line = zip_map(&fast_ema, &slow_ema, |f, s| f - s);
    let signal_line = Ewm::span(signal)
        .with_min_periods(slow + signal - 1)
        .mean(&line);
    let hist = zip_map(&line, &signal_line, |l, s| l - s);
    Macd {
        line,
        signal: signal_line,
        hist,
    }
}

fn clip_lower_zero(value: f64) -> f64 {
    if value.is_nan() { value } else { value.max(0.0) }
}

/// Wilder RSI; null while the average loss is zero.
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let delta = diff(close, 1);
    let gains: Vec<f64> = delta.iter().map(|d| clip_lower_zero(*d)).collect();
    let losses: Vec<f64> = delta.iter().map(|d| clip_lower_zero(-*d)).collect();
    let avg_gain = Ewm::wilder(period).mean(&gains);
    let avg_loss = Ewm::wilder(period).mean(&losses);
    zip_map(&avg_gain, &avg_loss, |up, down| {
        let rs = safe_div(up, down);
        100.0 - 100.0 / (1.0 + rs)
    })
}

#[derive(Clone, Debug)]
pub struct Stochastic {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(high: &[f64], low: &[f64], close: &[f64], k: usize, d: usize) -> Stochastic {
    let lowest = rolling(low, Window::strict(k), RollingStat::Min);
    let highest = rolling(high, Window::strict(k), RollingStat::Max);
    let k_line: Vec<f64> = close
        .iter()
        .zip(lowest.iter().zip(highest.iter()))
        .map(|(c, (lo, hi))| 100.0 * safe_div(c - lo, hi - lo))
        .collect();
    let d_line = rolling(&k_line, Window::strict(d), RollingStat::Mean);
    Stochastic {
        k: k_line,
        d: d_line,
    }
}

#[derive(Clone, Debug)]
pub struct Bollinger {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub width: Vec<f64>,
}

pub fn bollinger(close: &[f64], period: usize, num_std: f64) -> Bollinger {
    let middle = sma(close, period);
    let std = rolling(close, Window::strict(period), RollingStat::POPULATION_STD);
    let upper = zip_map(&middle, &std, |m, s| m + num_std * s);
    let lower = zip_map(&middle, &std, |m, s| m - num_std * s);
    let width = upper
        .iter()
        .zip(lower.iter().zip(middle.iter()))
        .map(|(u, (l, m))| safe_div(u - l, *m))
        .collect();
    Bollinger {
        middle,
        upper,
        lower,
        width,
    }
}

/// Largest of the three range terms that are defined.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let prev_close = shift(close, 1);
    (0..close.len())
        .map(|i| {
            [
                high[i] - low[i],
                (high[i] - prev_close[i]).abs(),
                (low[i] - prev_close[i]).abs(),
            ]
            .into_iter()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, f64::max)
        })
        .collect()
}

pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    Ewm::wilder(period).mean(&true_range(high, low, close))
}

pub fn compute(bars: &BarSeries) -> Result<FeaturePanel> {
    let (high, low, close) = (bars.high(), bars.low(), bars.close());
    let macd_lines = macd(close, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let stoch = stochastic(high, low, close, STOCH_K, STOCH_D);
    let bands = bollinger(close, BB_PERIOD, BB_NUM_STD);

    let mut panel = FeaturePanel::new(bars.dates().to_vec());
    for descriptor in catalog() {
        let n = descriptor.window_or_one();
        let values = match descriptor.formula {
            Formula::SimpleReturn => simple_returns(close),
            Formula::LogReturn => log_returns(close),
            Formula::CompoundedReturn => compounded_return(close, n),
            Formula::SimpleMovingAverage => sma(close, n),
            Formula::ExponentialMovingAverage => ema(close, n),
            Formula::MacdLine => macd_lines.line.clone(),
            Formula::MacdSignal => macd_lines.signal.clone(),
            Formula::MacdHistogram => macd_lines.hist.clone(),
            Formula::RelativeStrength => rsi(close, n),
            Formula::StochasticK => stoch.k.clone(),
            Formula::StochasticD => stoch.d.clone(),
            Formula::BollingerMiddle => bands.middle.clone(),
            Formula::BollingerUpper => bands.upper.clone(),
            Formula::BollingerLower => bands.lower.clone(),
            Formula::BollingerWidth => bands.width.clone(),
            Formula::AverageTrueRange => atr(high, low, close, n),
            other => bail!("{other:?} is not an indicator formula"),
        };
        panel.push(descriptor.name(), values)?;
    }
    Ok(panel)
}
