//! Volume pressure, spread proxies and illiquidity.

use anyhow::{Result, bail};
use barfeat_rs::feature::windowed;
use barfeat_rs::ops::{diff, flag, pct_change, safe_div, safe_ln, shift, zscore};
use barfeat_rs::rolling::{PairStat, RollingStat, Window, rolling, rolling_pair};
use barfeat_rs::{BarSeries, FeatureDescriptor, FeaturePanel, Formula, Suite};
use once_cell::sync::Lazy;

pub const PERCENTILE_WINDOWS: [usize; 3] = [20, 60, 252];
pub const SURGE_WINDOWS: [usize; 2] = [20, 60];
pub const SURGE_QUANTILE: f64 = 0.95;
pub const OBV_Z_WINDOW: usize = 20;
pub const SPREAD_WINDOW: usize = 20;
pub const AMIHUD_WINDOW: usize = 20;

const fn desc(template: &'static str, formula: Formula) -> FeatureDescriptor {
    FeatureDescriptor::new(Suite::Liquidity, template, formula)
}

static CATALOG: Lazy<Vec<FeatureDescriptor>> = Lazy::new(|| {
    let mut catalog = windowed(
        desc("vol_pct_{n}", Formula::VolumePercentile),
        &PERCENTILE_WINDOWS,
    );
    catalog.extend([
        desc("OBV", Formula::OnBalanceVolume),
        desc("OBV_z{n}", Formula::OnBalanceVolumeZ).with_window(OBV_Z_WINDOW),
    ]);
    for n in SURGE_WINDOWS {
        catalog.extend([
            desc("vol_avg_{n}", Formula::VolumeAverage).with_window(n),
            desc("vol_ratio_{n}", Formula::VolumeRatio).with_window(n),
            desc("vol_p95_{n}", Formula::VolumeThreshold).with_window(n),
            desc("vol_gt_p95_{n}", Formula::VolumeSurge).with_window(n).flag(),
            desc("vol_z_{n}", Formula::VolumeZ).with_window(n),
        ]);
    }
    catalog.extend([
        desc("roll_spread_abs_{n}", Formula::RollSpreadAbsolute).with_window(SPREAD_WINDOW),
        desc("roll_spread_pct_{n}", Formula::RollSpreadPercent).with_window(SPREAD_WINDOW),
        desc("HL_rel_range", Formula::HighLowRelativeRange),
        desc("HL_log_range", Formula::HighLowLogRange),
        desc("amihud_illiq_mean_{n}", Formula::AmihudMean).with_window(AMIHUD_WINDOW),
        desc("amihud_illiq_median_{n}", Formula::AmihudMedian).with_window(AMIHUD_WINDOW),
    ]);
    catalog
});

pub fn catalog() -> &'static [FeatureDescriptor] {
    &CATALOG
}

/// Signed cumulative volume. Flat or undefined moves and missing volume
/// contribute nothing.
pub fn on_balance_volume(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let moves = diff(close, 1);
    let mut total = 0.0;
    moves
        .iter()
        .zip(volume.iter())
        .map(|(delta, v)| {
            let sign = if *delta > 0.0 {
                1.0
            } else if *delta < 0.0 {
                -1.0
            } else {
                0.0
            };
            let v = if v.is_finite() { *v } else { 0.0 };
            total += sign * v;
            total
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct VolumeSurge {
    pub average: Vec<f64>,
    pub ratio: Vec<f64>,
    pub threshold: Vec<f64>,
    pub above: Vec<f64>,
    pub z: Vec<f64>,
}

pub fn volume_surge(volume: &[f64], window: usize, quantile: f64) -> VolumeSurge {
    let strict = Window::strict(window);
    let average = rolling(volume, strict, RollingStat::Mean);
    let std = rolling(volume, strict, RollingStat::POPULATION_STD);
    let threshold = rolling(volume, strict, RollingStat::Quantile(quantile));
    let ratio = volume
        .iter()
        .zip(average.iter())
        .map(|(v, avg)| safe_div(*v, *avg))
        .collect();
    let above = volume
        .iter()
        .zip(threshold.iter())
        .map(|(v, thr)| flag(v.is_finite() && thr.is_finite(), v >= thr))
        .collect();
    let z = zscore(volume, &average, &std);
    VolumeSurge {
        average,
        ratio,
        threshold,
        above,
        z,
    }
}

/// Roll (1984) effective spread from the first-order autocovariance of
/// price changes; positive autocovariance clips to zero.
pub fn roll_spread(close: &[f64], window: usize) -> Vec<f64> {
    let moves = diff(close, 1);
    let lagged = shift(&moves, 1);
    rolling_pair(
        &moves,
        &lagged,
        Window::strict(window),
        PairStat::Cov { ddof: 1 },
    )
    .into_iter()
    .map(|cov| {
        if cov.is_nan() {
            f64::NAN
        } else {
            2.0 * (-cov).max(0.0).sqrt()
        }
    })
    .collect()
}

/// `|ret_1d| / (Close * Volume)`, missing on zero dollar volume.
pub fn amihud_daily(close: &[f64], volume: &[f64]) -> Vec<f64> {
    pct_change(close, 1)
        .iter()
        .zip(close.iter().zip(volume.iter()))
        .map(|(r, (c, v))| safe_div(r.abs(), c * v))
        .collect()
}

pub fn compute(bars: &BarSeries) -> Result<FeaturePanel> {
    let (high, low, close) = (bars.high(), bars.low(), bars.close());
    let volume = bars.volume_or_nan();
    let obv = on_balance_volume(close, &volume);
    let spread = roll_spread(close, SPREAD_WINDOW);
    let amihud = amihud_daily(close, &volume);
    let surges: Vec<(usize, VolumeSurge)> = SURGE_WINDOWS
        .iter()
        .map(|n| (*n, volume_surge(&volume, *n, SURGE_QUANTILE)))
        .collect();
    let surge = |n: usize| surges.iter().find(|(w, _)| *w == n).map(|(_, s)| s);

    let mut panel = FeaturePanel::new(bars.dates().to_vec());
    for descriptor in catalog() {
        let n = descriptor.window_or_one();
        let values = match descriptor.formula {
            Formula::VolumePercentile => {
                rolling(&volume, Window::strict(n), RollingStat::PercentRank)
            }
            Formula::OnBalanceVolume => obv.clone(),
            Formula::OnBalanceVolumeZ => {
                let mean = rolling(&obv, Window::strict(n), RollingStat::Mean);
                let std = rolling(&obv, Window::strict(n), RollingStat::POPULATION_STD);
                zscore(&obv, &mean, &std)
            }
            Formula::VolumeAverage
            | Formula::VolumeRatio
            | Formula::VolumeThreshold
            | Formula::VolumeSurge
            | Formula::VolumeZ => {
                let Some(s) = surge(n) else {
                    bail!("No volume surge window {n}");
                };
                match descriptor.formula {
                    Formula::VolumeAverage => s.average.clone(),
                    Formula::VolumeRatio => s.ratio.clone(),
                    Formula::VolumeThreshold => s.threshold.clone(),
                    Formula::VolumeSurge => s.above.clone(),
                    _ => s.z.clone(),
                }
            }
            Formula::RollSpreadAbsolute => spread.clone(),
            Formula::RollSpreadPercent => spread
                .iter()
                .zip(close.iter())
                .map(|(s, c)| safe_div(*s, *c))
                .collect(),
            Formula::HighLowRelativeRange => (0..close.len())
                .map(|i| safe_div(high[i] - low[i], close[i]))
                .collect(),
            Formula::HighLowLogRange => high
                .iter()
                .zip(low.iter())
                .map(|(h, l)| safe_ln(*h) - safe_ln(*l))
                .collect(),
            Formula::AmihudMean => rolling(&amihud, Window::strict(n), RollingStat::Mean),
            Formula::AmihudMedian => rolling(&amihud, Window::strict(n), RollingStat::Median),
            other => bail!("{other:?} is not a liquidity formula"),
        };
        panel.push(descriptor.name(), values)?;
    }
    Ok(panel)
}
