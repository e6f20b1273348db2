use crate::config::Suite;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    Continuous,
    /// 0/1 float, missing where its inputs are.
    Flag,
}

/// Formula tag for every column a suite can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Formula {
    SimpleReturn,
    LogReturn,
    CompoundedReturn,
    SimpleMovingAverage,
    ExponentialMovingAverage,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    RelativeStrength,
    StochasticK,
    StochasticD,
    BollingerMiddle,
    BollingerUpper,
    BollingerLower,
    BollingerWidth,
    AverageTrueRange,

    PreviousClose,
    GapAbsolute,
    GapPercent,
    GapLog,
    OvernightReturn,
    OvernightLogReturn,
    IntradayReturn,
    IntradayLogReturn,
    DailyReturn,
    DailyLogReturn,
    GapAny,
    GapUp,
    GapDown,
    GapFilled,
    FillRateAny,
    FillRateUp,
    FillRateDown,

    RealizedVolatility,
    ParkinsonVolatility,
    GarmanKlassVolatility,
    RogersSatchellVolatility,
    RangeAbsolute,
    RangeRelative,
    RangeLog,
    RealizedSkew,
    RealizedExcessKurtosis,

    VolumePercentile,
    OnBalanceVolume,
    OnBalanceVolumeZ,
    VolumeAverage,
    VolumeRatio,
    VolumeThreshold,
    VolumeSurge,
    VolumeZ,
    RollSpreadAbsolute,
    RollSpreadPercent,
    HighLowRelativeRange,
    HighLowLogRange,
    AmihudMean,
    AmihudMedian,

    Momentum,
    DaysSinceHigh,
    DaysSinceLow,
    DistanceFromSma,
    DistanceFromEma,
    ReturnZScore,
    ReturnAutocorrelation,
}

/// One emitted column: a name template whose `{n}` placeholder is filled
/// from `window`, the formula that produces it and the owning suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureDescriptor {
    pub template: &'static str,
    pub window: Option<usize>,
    pub formula: Formula,
    pub kind: FeatureKind,
    pub suite: Suite,
}

impl FeatureDescriptor {
    pub const fn new(suite: Suite, template: &'static str, formula: Formula) -> Self {
        Self {
            template,
            window: None,
            formula,
            kind: FeatureKind::Continuous,
            suite,
        }
    }

    pub const fn flag(self) -> Self {
        Self {
            kind: FeatureKind::Flag,
            ..self
        }
    }

    pub const fn with_window(self, window: usize) -> Self {
        Self {
            window: Some(window),
            ..self
        }
    }

    pub fn name(&self) -> String {
        match self.window {
            Some(n) => self.template.replace("{n}", &n.to_string()),
            None => self.template.to_string(),
        }
    }

    /// Window for windowed formulas; fixed-name formulas report 1.
    pub fn window_or_one(&self) -> usize {
        self.window.unwrap_or(1)
    }
}

/// Expands `base` once per window, preserving window order.
pub fn windowed(base: FeatureDescriptor, windows: &[usize]) -> Vec<FeatureDescriptor> {
    windows.iter().map(|n| base.with_window(*n)).collect()
}
