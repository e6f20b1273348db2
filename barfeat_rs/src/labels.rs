use crate::ops::{forward_fill, lead, pct_change};

/// Return realised from row `i` to row `i + 1`: forward-filled close,
/// one-step percent change, then shifted back one row. The last row has no
/// label.
pub fn next_period_return(close: &[f64]) -> Vec<f64> {
    lead(&pct_change(&forward_fill(close), 1), 1)
}
