//! Recursive (non-adjusted) exponential means.

/// Exponential mean with smoothing factor `alpha`, emitting values once
/// `min_periods` observations have been seen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ewm {
    alpha: f64,
    min_periods: usize,
}

impl Ewm {
    /// `alpha = 2 / (span + 1)`, null until `span` observations.
    pub fn span(span: usize) -> Self {
        Self {
            alpha: 2.0 / (span as f64 + 1.0),
            min_periods: span,
        }
    }

    /// Wilder smoothing: `alpha = 1 / period`, null until `period` observations.
    pub fn wilder(period: usize) -> Self {
        Self {
            alpha: 1.0 / period.max(1) as f64,
            min_periods: period,
        }
    }

    pub fn with_min_periods(self, min_periods: usize) -> Self {
        Self {
            alpha: self.alpha,
            min_periods,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Seeds at the first finite value. Missing rows keep the carried mean
    /// while still decaying the weight of the previous estimate, so the next
    /// observation is weighted against an older history.
    pub fn mean(&self, values: &[f64]) -> Vec<f64> {
        let mut out = vec![f64::NAN; values.len()];
        let decay = 1.0 - self.alpha;
        let mut weighted = f64::NAN;
        let mut old_weight = 1.0;
        let mut nobs = 0usize;
        for (idx, &current) in values.iter().enumerate() {
            let observed = current.is_finite();
            if observed {
                nobs += 1;
            }
            if weighted.is_finite() {
                old_weight *= decay;
                if observed {
                    if weighted != current {
                        weighted = (old_weight * weighted + self.alpha * current)
                            / (old_weight + self.alpha);
                    }
                    old_weight = 1.0;
                }
            } else if observed {
                weighted = current;
            }
            if nobs >= self.min_periods.max(1) {
                out[idx] = weighted;
            }
        }
        out
    }
}
