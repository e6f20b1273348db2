use std::f64::consts::LN_2;

use anyhow::Result;
use barfeat_rs::{Bar, BarSeries, Suite};
use chrono::{Duration, NaiveDate};
use suites_rs::{compute_suite, indicators};

const TOL: f64 = 1e-9;

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= TOL * expected.abs().max(1.0)
}

fn series(rows: &[(f64, f64, f64, f64)]) -> BarSeries {
    let start = NaiveDate::from_ymd_opt(2022, 3, 1).expect("valid date");
    let bars = rows
        .iter()
        .enumerate()
        .map(|(i, (open, high, low, close))| Bar {
            date: start + Duration::days(i as i64),
            open: *open,
            high: *high,
            low: *low,
            close: *close,
            volume: Some(1_000.0),
        })
        .collect();
    BarSeries::from_bars(bars)
}

fn closes_only(closes: &[f64]) -> BarSeries {
    let rows: Vec<_> = closes.iter().map(|c| (*c, c + 1.0, c - 1.0, *c)).collect();
    series(&rows)
}

#[test]
fn returns_and_short_moving_average_match_hand_values() -> Result<()> {
    let bars = closes_only(&[100.0, 102.0, 101.0, 105.0, 103.0]);
    let panel = compute_suite(Suite::Indicators, &bars)?;
    let ret = panel.column("ret_1d").expect("ret_1d emitted");
    assert!(ret[0].is_nan(), "first return has no prior close");
    let expected = [0.02, 101.0 / 102.0 - 1.0, 105.0 / 101.0 - 1.0, 103.0 / 105.0 - 1.0];
    for (actual, expected) in ret[1..].iter().zip(expected) {
        assert!(approx(*actual, expected), "{actual} vs {expected}");
    }

    let sma3 = indicators::sma(bars.close(), 3);
    assert!(sma3[0].is_nan() && sma3[1].is_nan());
    assert!(approx(sma3[2], 101.0));
    assert!(approx(sma3[4], (101.0 + 105.0 + 103.0) / 3.0));

    let sma5 = panel.column("SMA_5").expect("SMA_5 emitted");
    assert!(sma5[..4].iter().all(|v| v.is_nan()));
    assert!(approx(sma5[4], 102.2));
    assert!(
        panel.column("SMA_200").expect("emitted").iter().all(|v| v.is_nan()),
        "windows longer than the history stay null"
    );
    Ok(())
}

#[test]
fn gap_up_that_trades_back_through_prior_close_is_filled() -> Result<()> {
    let bars = series(&[(99.0, 101.0, 98.5, 100.0), (105.0, 106.0, 98.0, 104.0)]);
    let panel = compute_suite(Suite::Gaps, &bars)?;
    let col = |name: &str| panel.column(name).expect(name).to_vec();

    assert!(approx(col("gap_abs")[1], 5.0));
    assert!(approx(col("gap_pct")[1], 0.05));
    assert_eq!(col("is_gap_up")[1], 1.0);
    assert_eq!(col("is_gap_down")[1], 0.0);
    assert_eq!(col("gap_filled")[1], 1.0);
    for flag in ["is_gap", "is_gap_up", "is_gap_down", "gap_filled"] {
        assert!(col(flag)[0].is_nan(), "{flag} undefined without a prior close");
    }
    assert!(approx(col("p_fill_up_20d")[1], 1.0));
    assert!(col("p_fill_down_20d")[1].is_nan(), "no gap-down days yet");
    Ok(())
}

#[test]
fn constant_range_gives_closed_form_range_estimators() -> Result<()> {
    let rows = vec![(100.0, 102.0, 98.0, 100.0); 5];
    let bars = series(&rows);
    let panel = compute_suite(Suite::Volatility, &bars)?;

    let hl = (102.0_f64 / 98.0).ln();
    let parkinson_daily = hl * hl / (4.0 * LN_2);
    let parkinson = panel.column("ParkinsonVol_5d_ann").expect("emitted");
    assert!(parkinson[..4].iter().all(|v| v.is_nan()));
    assert!(approx(parkinson[4], (252.0 * parkinson_daily).sqrt()));

    let garman_klass = panel.column("GarmanKlassVol_5d_ann").expect("emitted");
    assert!(approx(garman_klass[4], (252.0 * 0.5 * hl * hl).sqrt()));

    let realized = panel.column("RealizedVol_5d_ann").expect("emitted");
    assert!(realized[4].is_nan(), "five closes give only four log returns");
    assert!(approx(panel.column("Range_abs").expect("emitted")[0], 4.0));
    Ok(())
}

#[test]
fn trend_and_liquidity_run_on_short_histories() -> Result<()> {
    let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.4).sin()).collect();
    let bars = closes_only(&closes);

    let trend = compute_suite(Suite::Trend, &bars)?;
    let mom1 = trend.column("mom_1d").expect("emitted");
    assert!(approx(mom1[1], closes[1] / closes[0] - 1.0));
    let days_since_high = trend.column("days_since_high_20d").expect("emitted");
    assert!(days_since_high[18].is_nan());
    assert!(days_since_high[19..].iter().all(|v| (0.0..20.0).contains(v)));

    let liquidity = compute_suite(Suite::Liquidity, &bars)?;
    let obv = liquidity.column("OBV").expect("emitted");
    assert_eq!(obv[0], 0.0);
    let surge = liquidity.column("vol_gt_p95_20").expect("emitted");
    assert!(surge[18].is_nan());
    assert_eq!(surge[19], 1.0, "constant volume sits exactly on its own p95");
    Ok(())
}
