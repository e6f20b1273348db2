//! Incremental rolling-window statistics.
//!
//! Every estimator is a [`WindowAccumulator`] fed by one driver loop that owns
//! the window edges and null propagation: non-finite inputs are skipped, and a
//! row only produces a value once the window holds at least `min_periods`
//! valid observations. Updates are O(1) amortized except for the order
//! statistics, which keep a sorted buffer of the current window.

use std::collections::VecDeque;

/// Lookback span plus the number of valid observations required for output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub size: usize,
    pub min_periods: usize,
}

impl Window {
    /// Window of `size` rows that needs every row to be valid.
    pub const fn strict(size: usize) -> Self {
        Self {
            size,
            min_periods: size,
        }
    }

    pub const fn with_min_periods(self, min_periods: usize) -> Self {
        Self {
            size: self.size,
            min_periods,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RollingStat {
    Sum,
    Mean,
    Var { ddof: u8 },
    Std { ddof: u8 },
    Min,
    Max,
    /// Linear-interpolated quantile, `q` in [0, 1].
    Quantile(f64),
    Median,
    /// Fraction of window values less than or equal to the current value.
    PercentRank,
    /// Bias-adjusted sample skewness.
    Skew,
    /// Bias-adjusted sample excess kurtosis.
    Kurt,
    Product,
    /// Rows since the window maximum; ties resolve to the earliest row.
    BarsSinceMax,
    BarsSinceMin,
}

impl RollingStat {
    pub const POPULATION_STD: RollingStat = RollingStat::Std { ddof: 0 };
    pub const SAMPLE_STD: RollingStat = RollingStat::Std { ddof: 1 };
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PairStat {
    Cov { ddof: u8 },
    Corr,
}

pub trait WindowAccumulator {
    fn add(&mut self, index: usize, value: f64);
    fn remove(&mut self, index: usize, value: f64);
    fn value(&self, index: usize, nobs: usize) -> f64;
}

pub trait PairAccumulator {
    fn add(&mut self, x: f64, y: f64);
    fn remove(&mut self, x: f64, y: f64);
    fn value(&self, nobs: usize) -> f64;
}

/// Evaluates `stat` over every window of `values`.
pub fn rolling(values: &[f64], window: Window, stat: RollingStat) -> Vec<f64> {
    match stat {
        RollingStat::Sum => drive(values, window, SumAccumulator::new(SumOutput::Sum)),
        RollingStat::Mean => drive(values, window, SumAccumulator::new(SumOutput::Mean)),
        RollingStat::Var { ddof } => drive(
            values,
            window,
            VarianceAccumulator::new(ddof, VarianceOutput::Variance),
        ),
        RollingStat::Std { ddof } => drive(
            values,
            window,
            VarianceAccumulator::new(ddof, VarianceOutput::StdDev),
        ),
        RollingStat::Min => drive(
            values,
            window,
            ExtremeAccumulator::new(Extreme::Min, ExtremeOutput::Value),
        ),
        RollingStat::Max => drive(
            values,
            window,
            ExtremeAccumulator::new(Extreme::Max, ExtremeOutput::Value),
        ),
        RollingStat::BarsSinceMax => drive(
            values,
            window,
            ExtremeAccumulator::new(Extreme::Max, ExtremeOutput::BarsSince),
        ),
        RollingStat::BarsSinceMin => drive(
            values,
            window,
            ExtremeAccumulator::new(Extreme::Min, ExtremeOutput::BarsSince),
        ),
        RollingStat::Quantile(q) => drive(
            values,
            window,
            OrderAccumulator::new(OrderOutput::Quantile(q.clamp(0.0, 1.0))),
        ),
        RollingStat::Median => drive(
            values,
            window,
            OrderAccumulator::new(OrderOutput::Quantile(0.5)),
        ),
        RollingStat::PercentRank => {
            drive(values, window, OrderAccumulator::new(OrderOutput::PercentRank))
        }
        RollingStat::Skew => drive(values, window, ShapeAccumulator::new(Shape::Skew)),
        RollingStat::Kurt => drive(values, window, ShapeAccumulator::new(Shape::Kurt)),
        RollingStat::Product => drive(values, window, ProductAccumulator::new(window.size)),
    }
}

/// Evaluates a bivariate statistic over complete `(x, y)` pairs.
pub fn rolling_pair(x: &[f64], y: &[f64], window: Window, stat: PairStat) -> Vec<f64> {
    drive_pairs(x, y, window, CoMomentAccumulator::new(stat))
}

pub fn drive<A: WindowAccumulator>(values: &[f64], window: Window, mut acc: A) -> Vec<f64> {
    let len = values.len();
    let mut out = vec![f64::NAN; len];
    if window.size == 0 {
        return out;
    }
    let min_periods = window.min_periods.max(1);
    let mut nobs = 0usize;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_finite() {
            acc.add(idx, value);
            nobs += 1;
        }
        if idx >= window.size {
            let leaving = idx - window.size;
            let old = values[leaving];
            if old.is_finite() {
                acc.remove(leaving, old);
                nobs -= 1;
            }
        }
        if nobs >= min_periods {
            out[idx] = acc.value(idx, nobs);
        }
    }
    out
}

pub fn drive_pairs<A: PairAccumulator>(
    x: &[f64],
    y: &[f64],
    window: Window,
    mut acc: A,
) -> Vec<f64> {
    let len = x.len().min(y.len());
    let mut out = vec![f64::NAN; len];
    if window.size == 0 {
        return out;
    }
    let complete = |i: usize| x[i].is_finite() && y[i].is_finite();
    let min_periods = window.min_periods.max(1);
    let mut nobs = 0usize;
    for idx in 0..len {
        if complete(idx) {
            acc.add(x[idx], y[idx]);
            nobs += 1;
        }
        if idx >= window.size {
            let leaving = idx - window.size;
            if complete(leaving) {
                acc.remove(x[leaving], y[leaving]);
                nobs -= 1;
            }
        }
        if nobs >= min_periods {
            out[idx] = acc.value(nobs);
        }
    }
    out
}

/// Neumaier-compensated running sum.
#[derive(Clone, Copy, Debug, Default)]
struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    fn add(&mut self, value: f64) {
        let total = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - total) + value;
        } else {
            self.compensation += (value - total) + self.sum;
        }
        self.sum = total;
    }

    fn total(&self) -> f64 {
        self.sum + self.compensation
    }
}

/// Length of the trailing run of identical values added so far. When the run
/// covers the whole window, every value in it is equal, which lets constant
/// windows report exact results instead of accumulated rounding noise.
#[derive(Clone, Copy, Debug)]
struct EqualRun {
    last: f64,
    count: usize,
}

impl EqualRun {
    fn new() -> Self {
        Self {
            last: f64::NAN,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        if value == self.last {
            self.count += 1;
        } else {
            self.last = value;
            self.count = 1;
        }
    }

    fn covers(&self, nobs: usize) -> bool {
        nobs > 0 && self.count >= nobs
    }
}

#[derive(Clone, Copy, Debug)]
enum SumOutput {
    Sum,
    Mean,
}

struct SumAccumulator {
    sum: CompensatedSum,
    run: EqualRun,
    output: SumOutput,
}

impl SumAccumulator {
    fn new(output: SumOutput) -> Self {
        Self {
            sum: CompensatedSum::default(),
            run: EqualRun::new(),
            output,
        }
    }
}

impl WindowAccumulator for SumAccumulator {
    fn add(&mut self, _index: usize, value: f64) {
        self.sum.add(value);
        self.run.push(value);
    }

    fn remove(&mut self, _index: usize, value: f64) {
        self.sum.add(-value);
    }

    fn value(&self, _index: usize, nobs: usize) -> f64 {
        let constant = self.run.covers(nobs);
        match self.output {
            SumOutput::Sum if constant => self.run.last * nobs as f64,
            SumOutput::Sum => self.sum.total(),
            SumOutput::Mean if constant => self.run.last,
            SumOutput::Mean => self.sum.total() / nobs as f64,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum VarianceOutput {
    Variance,
    StdDev,
}

/// Welford add/remove updates of the mean and the sum of squared deviations.
struct VarianceAccumulator {
    n: usize,
    mean: f64,
    ssqdm: f64,
    run: EqualRun,
    ddof: usize,
    output: VarianceOutput,
}

impl VarianceAccumulator {
    fn new(ddof: u8, output: VarianceOutput) -> Self {
        Self {
            n: 0,
            mean: 0.0,
            ssqdm: 0.0,
            run: EqualRun::new(),
            ddof: ddof as usize,
            output,
        }
    }
}

impl WindowAccumulator for VarianceAccumulator {
    fn add(&mut self, _index: usize, value: f64) {
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        self.ssqdm += delta * (value - self.mean);
        self.run.push(value);
    }

    fn remove(&mut self, _index: usize, value: f64) {
        if self.n <= 1 {
            self.n = 0;
            self.mean = 0.0;
            self.ssqdm = 0.0;
            return;
        }
        let old_mean = self.mean;
        self.n -= 1;
        self.mean = old_mean - (value - old_mean) / self.n as f64;
        self.ssqdm -= (value - self.mean) * (value - old_mean);
    }

    fn value(&self, _index: usize, nobs: usize) -> f64 {
        if nobs <= self.ddof {
            return f64::NAN;
        }
        let variance = if nobs == 1 || self.run.covers(nobs) {
            0.0
        } else {
            (self.ssqdm / (nobs - self.ddof) as f64).max(0.0)
        };
        match self.output {
            VarianceOutput::Variance => variance,
            VarianceOutput::StdDev => variance.sqrt(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Extreme {
    Min,
    Max,
}

#[derive(Clone, Copy, Debug)]
enum ExtremeOutput {
    Value,
    BarsSince,
}

/// Monotonic deque of `(row, value)`. Equal values are kept, so the front is
/// always the earliest occurrence of the current extreme.
struct ExtremeAccumulator {
    deque: VecDeque<(usize, f64)>,
    extreme: Extreme,
    output: ExtremeOutput,
}

impl ExtremeAccumulator {
    fn new(extreme: Extreme, output: ExtremeOutput) -> Self {
        Self {
            deque: VecDeque::new(),
            extreme,
            output,
        }
    }

    fn dominated(&self, existing: f64, incoming: f64) -> bool {
        match self.extreme {
            Extreme::Max => existing < incoming,
            Extreme::Min => existing > incoming,
        }
    }
}

impl WindowAccumulator for ExtremeAccumulator {
    fn add(&mut self, index: usize, value: f64) {
        while let Some(&(_, back)) = self.deque.back() {
            if self.dominated(back, value) {
                self.deque.pop_back();
            } else {
                break;
            }
        }
        self.deque.push_back((index, value));
    }

    fn remove(&mut self, index: usize, _value: f64) {
        if matches!(self.deque.front(), Some(&(front, _)) if front == index) {
            self.deque.pop_front();
        }
    }

    fn value(&self, index: usize, _nobs: usize) -> f64 {
        match (self.deque.front(), self.output) {
            (Some(&(_, value)), ExtremeOutput::Value) => value,
            (Some(&(row, _)), ExtremeOutput::BarsSince) => (index - row) as f64,
            (None, _) => f64::NAN,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum OrderOutput {
    Quantile(f64),
    PercentRank,
}

struct OrderAccumulator {
    sorted: Vec<f64>,
    latest: Option<(usize, f64)>,
    output: OrderOutput,
}

impl OrderAccumulator {
    fn new(output: OrderOutput) -> Self {
        Self {
            sorted: Vec::new(),
            latest: None,
            output,
        }
    }
}

impl WindowAccumulator for OrderAccumulator {
    fn add(&mut self, index: usize, value: f64) {
        let pos = self.sorted.partition_point(|v| *v < value);
        self.sorted.insert(pos, value);
        self.latest = Some((index, value));
    }

    fn remove(&mut self, _index: usize, value: f64) {
        let pos = self.sorted.partition_point(|v| *v < value);
        if pos < self.sorted.len() && self.sorted[pos] == value {
            self.sorted.remove(pos);
        }
    }

    fn value(&self, index: usize, nobs: usize) -> f64 {
        if self.sorted.is_empty() {
            return f64::NAN;
        }
        match self.output {
            OrderOutput::Quantile(q) => interpolate_sorted(&self.sorted, q),
            OrderOutput::PercentRank => match self.latest {
                Some((row, current)) if row == index => {
                    let at_or_below = self.sorted.partition_point(|v| *v <= current);
                    at_or_below as f64 / nobs as f64
                }
                _ => f64::NAN,
            },
        }
    }
}

/// Linear interpolation between the order statistics around `q * (n - 1)`.
pub fn interpolate_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
    }
}

#[derive(Clone, Copy, Debug)]
enum Shape {
    Skew,
    Kurt,
}

/// Running power sums of values shifted by the first observation; skewness and
/// kurtosis are shift invariant and the shift keeps the sums well scaled.
struct ShapeAccumulator {
    shift: Option<f64>,
    sums: [CompensatedSum; 4],
    run: EqualRun,
    shape: Shape,
}

impl ShapeAccumulator {
    fn new(shape: Shape) -> Self {
        Self {
            shift: None,
            sums: [CompensatedSum::default(); 4],
            run: EqualRun::new(),
            shape,
        }
    }

    fn accumulate(&mut self, value: f64, sign: f64) {
        let shift = *self.shift.get_or_insert(value);
        let y = value - shift;
        let mut power = 1.0;
        for sum in self.sums.iter_mut() {
            power *= y;
            sum.add(sign * power);
        }
    }
}

impl WindowAccumulator for ShapeAccumulator {
    fn add(&mut self, _index: usize, value: f64) {
        self.accumulate(value, 1.0);
        self.run.push(value);
    }

    fn remove(&mut self, _index: usize, value: f64) {
        self.accumulate(value, -1.0);
    }

    fn value(&self, _index: usize, nobs: usize) -> f64 {
        let n = nobs as f64;
        let minimum = match self.shape {
            Shape::Skew => 3,
            Shape::Kurt => 4,
        };
        if nobs < minimum || self.run.covers(nobs) {
            return f64::NAN;
        }
        let a = self.sums[0].total() / n;
        let b = self.sums[1].total() / n - a * a;
        if b <= 1e-14 {
            return f64::NAN;
        }
        let c = self.sums[2].total() / n - a * a * a - 3.0 * a * b;
        match self.shape {
            Shape::Skew => {
                let r = b.sqrt();
                ((n * (n - 1.0)).sqrt() * c) / ((n - 2.0) * r * r * r)
            }
            Shape::Kurt => {
                let d = self.sums[3].total() / n
                    - a * a * a * a
                    - 6.0 * b * a * a
                    - 4.0 * c * a;
                let k = (n * n - 1.0) * d / (b * b) - 3.0 * (n - 1.0) * (n - 1.0);
                k / ((n - 2.0) * (n - 3.0))
            }
        }
    }
}

/// Product of the non-zero values with a separate zero count. The running
/// product is rebuilt from the buffered window every `reseed_every` removals
/// to stop division drift from accumulating.
struct ProductAccumulator {
    values: VecDeque<f64>,
    product: f64,
    zeros: usize,
    removals: usize,
    reseed_every: usize,
}

impl ProductAccumulator {
    fn new(window: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(window),
            product: 1.0,
            zeros: 0,
            removals: 0,
            reseed_every: window.max(1),
        }
    }

    fn reseed(&mut self) {
        self.product = self
            .values
            .iter()
            .filter(|v| **v != 0.0)
            .product::<f64>();
        self.removals = 0;
    }
}

impl WindowAccumulator for ProductAccumulator {
    fn add(&mut self, _index: usize, value: f64) {
        self.values.push_back(value);
        if value == 0.0 {
            self.zeros += 1;
        } else {
            self.product *= value;
        }
    }

    fn remove(&mut self, _index: usize, value: f64) {
        self.values.pop_front();
        if value == 0.0 {
            self.zeros = self.zeros.saturating_sub(1);
        } else {
            self.product /= value;
        }
        self.removals += 1;
        if self.removals >= self.reseed_every {
            self.reseed();
        }
    }

    fn value(&self, _index: usize, _nobs: usize) -> f64 {
        if self.zeros > 0 { 0.0 } else { self.product }
    }
}

/// Paired Welford co-moments for covariance and Pearson correlation.
struct CoMomentAccumulator {
    n: usize,
    mean_x: f64,
    mean_y: f64,
    m2_x: f64,
    m2_y: f64,
    c_xy: f64,
    run_x: EqualRun,
    run_y: EqualRun,
    stat: PairStat,
}

impl CoMomentAccumulator {
    fn new(stat: PairStat) -> Self {
        Self {
            n: 0,
            mean_x: 0.0,
            mean_y: 0.0,
            m2_x: 0.0,
            m2_y: 0.0,
            c_xy: 0.0,
            run_x: EqualRun::new(),
            run_y: EqualRun::new(),
            stat,
        }
    }
}

impl PairAccumulator for CoMomentAccumulator {
    fn add(&mut self, x: f64, y: f64) {
        self.n += 1;
        let n = self.n as f64;
        let dx = x - self.mean_x;
        let dy = y - self.mean_y;
        self.mean_x += dx / n;
        self.mean_y += dy / n;
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
        self.c_xy += dx * (y - self.mean_y);
        self.run_x.push(x);
        self.run_y.push(y);
    }

    fn remove(&mut self, x: f64, y: f64) {
        if self.n <= 1 {
            self.n = 0;
            self.mean_x = 0.0;
            self.mean_y = 0.0;
            self.m2_x = 0.0;
            self.m2_y = 0.0;
            self.c_xy = 0.0;
            return;
        }
        let old_x = self.mean_x;
        let old_y = self.mean_y;
        self.n -= 1;
        let n = self.n as f64;
        self.mean_x = old_x - (x - old_x) / n;
        self.mean_y = old_y - (y - old_y) / n;
        self.m2_x -= (x - self.mean_x) * (x - old_x);
        self.m2_y -= (y - self.mean_y) * (y - old_y);
        self.c_xy -= (x - self.mean_x) * (y - old_y);
    }

    fn value(&self, nobs: usize) -> f64 {
        match self.stat {
            PairStat::Cov { ddof } => {
                let ddof = ddof as usize;
                if nobs <= ddof {
                    return f64::NAN;
                }
                if self.run_x.covers(nobs) || self.run_y.covers(nobs) {
                    return 0.0;
                }
                self.c_xy / (nobs - ddof) as f64
            }
            PairStat::Corr => {
                if nobs < 2 || self.run_x.covers(nobs) || self.run_y.covers(nobs) {
                    return f64::NAN;
                }
                let denom = (self.m2_x * self.m2_y).sqrt();
                if !(denom > 0.0) {
                    return f64::NAN;
                }
                (self.c_xy / denom).clamp(-1.0, 1.0)
            }
        }
    }
}

/// Pearson correlation over complete pairs; `None` when fewer than two pairs
/// exist or either side has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let mut acc = CoMomentAccumulator::new(PairStat::Corr);
    let mut nobs = 0usize;
    for (&a, &b) in x.iter().zip(y.iter()) {
        if a.is_finite() && b.is_finite() {
            acc.add(a, b);
            nobs += 1;
        }
    }
    let corr = acc.value(nobs);
    corr.is_finite().then_some(corr)
}
