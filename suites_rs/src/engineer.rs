use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use barfeat_rs::labels::next_period_return;
use barfeat_rs::storage::{WriteOutcome, read_csv_frame, write_frame_guarded};
use barfeat_rs::{BarSeries, FeatureConfig, FeaturePanel, NormalizeOptions, Suite, normalize_frame};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{gaps, indicators, liquidity, trend, volatility};

pub fn compute_suite(suite: Suite, bars: &BarSeries) -> Result<FeaturePanel> {
    match suite {
        Suite::Indicators => indicators::compute(bars),
        Suite::Gaps => gaps::compute(bars),
        Suite::Volatility => volatility::compute(bars),
        Suite::Liquidity => liquidity::compute(bars),
        Suite::Trend => trend::compute(bars),
    }
}

/// Runs each suite on its own rayon task. Results come back in the order of
/// `suites` regardless of which task finishes first.
pub fn compute_suites(
    bars: &BarSeries,
    suites: &[Suite],
    n_workers: usize,
) -> Result<Vec<(Suite, FeaturePanel)>> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(n_workers)
        .thread_name(|idx| format!("barfeat-suite-{idx}"))
        .build()
        .context("Failed to build suite worker pool")?;
    pool.install(|| {
        suites
            .par_iter()
            .map(|suite| {
                let panel = compute_suite(*suite, bars)
                    .with_context(|| format!("Failed to compute {} suite", suite.as_str()))?;
                debug!(suite = suite.as_str(), columns = panel.width(), "Suite computed");
                Ok((*suite, panel))
            })
            .collect()
    })
}

fn passthrough_panel(bars: &BarSeries) -> Result<FeaturePanel> {
    let mut panel = FeaturePanel::new(bars.dates().to_vec());
    for (name, values) in bars.passthrough_columns() {
        panel.push(name, values)?;
    }
    Ok(panel)
}

/// Combined panel plus each suite's own columns, both led by the passthrough
/// OHLCV columns.
pub struct EngineeredPanel {
    pub combined: FeaturePanel,
    pub per_suite: Vec<(Suite, FeaturePanel)>,
}

pub struct FeatureEngineer {
    bars: BarSeries,
}

impl FeatureEngineer {
    pub fn new(bars: BarSeries) -> Self {
        Self { bars }
    }

    pub fn from_csv(path: &Path, options: NormalizeOptions) -> Result<Self> {
        let frame = read_csv_frame(path)?;
        let bars = normalize_frame(&frame, options)
            .with_context(|| format!("Invalid bar data in {}", path.display()))?;
        Ok(Self::new(bars))
    }

    pub fn bars(&self) -> &BarSeries {
        &self.bars
    }

    /// Columns emitted by more than one suite keep the first suite's copy in
    /// the combined panel; per-suite panels keep their own.
    pub fn compute(&self, suites: &[Suite], n_workers: usize) -> Result<EngineeredPanel> {
        let computed = compute_suites(&self.bars, suites, n_workers)?;
        let mut combined = passthrough_panel(&self.bars)?;
        let mut per_suite = Vec::with_capacity(computed.len());
        for (suite, panel) in computed {
            for (name, values) in panel.columns() {
                if !combined.push(name, values.to_vec())? {
                    debug!(column = name, suite = suite.as_str(), "Skipping repeated column");
                }
            }
            let mut own = passthrough_panel(&self.bars)?;
            for (name, values) in panel.columns() {
                own.push(name, values.to_vec())?;
            }
            per_suite.push((suite, own));
        }
        Ok(EngineeredPanel {
            combined,
            per_suite,
        })
    }

    /// Next-period return derived from Close.
    pub fn target(&self) -> Vec<f64> {
        next_period_return(self.bars.close())
    }
}

fn log_outcome(outcome: WriteOutcome, path: &Path, columns: usize) {
    info!(
        ?outcome,
        columns,
        path = %path.display(),
        "Feature panel persisted"
    );
}

/// Normalizes the input CSV, computes the configured suites and writes
/// `feature_panel.csv` (plus per-suite files when requested) through the
/// hash guard. Returns the combined panel path.
pub fn prepare_features(config: &FeatureConfig) -> Result<PathBuf> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Unable to create {}", config.output_dir.display()))?;

    let engineer = FeatureEngineer::from_csv(
        &config.input_csv,
        NormalizeOptions {
            reject_invalid_bars: config.reject_invalid_bars,
        },
    )?;
    let suites = config.ordered_suites();
    info!(
        rows = engineer.bars().len(),
        suites = ?suites.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        n_workers = config.n_workers,
        "Computing feature suites"
    );
    let EngineeredPanel {
        mut combined,
        mut per_suite,
    } = engineer.compute(&suites, config.n_workers)?;

    if let Some(target) = &config.target_column {
        if !combined.push(target.clone(), engineer.target())? {
            info!(column = %target, "Target column name already used by a feature; keeping the feature");
        }
    }

    if config.date_start.is_some() || config.date_end.is_some() {
        combined.retain_dates(|date| config.includes_date(date));
        for (_, panel) in &mut per_suite {
            panel.retain_dates(|date| config.includes_date(date));
        }
        info!(
            rows = combined.height(),
            date_start = ?config.date_start,
            date_end = ?config.date_end,
            "Applied output date bounds"
        );
    }

    let panel_path = config.panel_path();
    let mut frame = combined.to_data_frame()?;
    let outcome = write_frame_guarded(&mut frame, &panel_path, config.ack_new_df)?;
    log_outcome(outcome, &panel_path, combined.width());

    if config.split_suites {
        for (suite, panel) in &per_suite {
            let path = config.suite_path(*suite);
            let mut frame = panel.to_data_frame()?;
            let outcome = write_frame_guarded(&mut frame, &path, config.ack_new_df)?;
            log_outcome(outcome, &path, panel.width());
        }
    }
    Ok(panel_path)
}
