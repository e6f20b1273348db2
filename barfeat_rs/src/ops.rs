//! Element-wise series helpers. Missing values are NaN throughout and every
//! undefined result (zero denominator, non-positive log argument, negative
//! radicand) is NaN rather than an infinity.

pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return f64::NAN;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() { ratio } else { f64::NAN }
}

pub fn safe_ln(value: f64) -> f64 {
    if value > 0.0 && value.is_finite() {
        value.ln()
    } else {
        f64::NAN
    }
}

pub fn safe_sqrt(value: f64) -> f64 {
    if value >= 0.0 { value.sqrt() } else { f64::NAN }
}

/// 0/1 flag that stays missing when the predicate inputs are.
pub fn flag(defined: bool, condition: bool) -> f64 {
    match (defined, condition) {
        (false, _) => f64::NAN,
        (true, true) => 1.0,
        (true, false) => 0.0,
    }
}

/// Moves values `lag` rows later; the first `lag` rows become missing.
pub fn shift(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= lag { values[i - lag] } else { f64::NAN })
        .collect()
}

/// Moves values `lead` rows earlier; the last `lead` rows become missing.
pub fn lead(values: &[f64], lead: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| values.get(i + lead).copied().unwrap_or(f64::NAN))
        .collect()
}

pub fn diff(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= lag { values[i] - values[i - lag] } else { f64::NAN })
        .collect()
}

/// `values[i] / values[i - lag] - 1`.
pub fn pct_change(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i >= lag {
                safe_div(values[i], values[i - lag]) - 1.0
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// `ln(values[i]) - ln(values[i - 1])`.
pub fn log_returns(values: &[f64]) -> Vec<f64> {
    let logs: Vec<f64> = values.iter().map(|v| safe_ln(*v)).collect();
    diff(&logs, 1)
}

pub fn forward_fill(values: &[f64]) -> Vec<f64> {
    let mut last = f64::NAN;
    values
        .iter()
        .map(|v| {
            if v.is_finite() {
                last = *v;
            }
            last
        })
        .collect()
}

pub fn zip_map(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y)).collect()
}

pub fn map(values: &[f64], f: impl Fn(f64) -> f64) -> Vec<f64> {
    values.iter().map(|v| f(*v)).collect()
}

/// `(value - mean) / std`, missing when `std` is zero.
pub fn zscore(values: &[f64], mean: &[f64], std: &[f64]) -> Vec<f64> {
    values
        .iter()
        .zip(mean.iter().zip(std.iter()))
        .map(|(v, (m, s))| safe_div(v - m, *s))
        .collect()
}
