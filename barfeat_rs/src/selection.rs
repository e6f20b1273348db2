//! Leakage filtering and train-only correlation pruning.

use anyhow::Context;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{SELECTED_FEATURES_FILE, SELECTION_REPORT_FILE, SelectionConfig};
use crate::error::SelectionError;
use crate::panel::FeaturePanel;
use crate::rolling::pearson;
use crate::storage::{read_csv_frame, write_guarded};

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

static DEFAULT_EXACT: Lazy<Vec<String>> = Lazy::new(|| {
    owned(&[
        "Date",
        "Close",
        "SPY_Close",
        "SPY_AdjClose",
        "Price_Change",
        "Price_Change_Pct",
        "spy_ohlcv_1drth_close",
    ])
});

static DEFAULT_KEYWORDS: Lazy<Vec<String>> = Lazy::new(|| {
    owned(&[
        "Open",
        "High",
        "Low",
        "Close",
        "AdjClose",
        "ohlcv_1drth_open",
        "ohlcv_1drth_high",
        "ohlcv_1drth_low",
        "ohlcv_1drth_close",
    ])
});

static DEFAULT_PREFIXES: Lazy<Vec<String>> = Lazy::new(|| owned(&["sector_data_Prices_"]));

static DEFAULT_MACRO_MARKERS: Lazy<Vec<String>> =
    Lazy::new(|| owned(&["macro_positioning_data"]));

static DEFAULT_MACRO_SUFFIXES: Lazy<Vec<String>> =
    Lazy::new(|| owned(&["_ffill", "_lag1", "_chg", "_z"]));

static DEFAULT_EXCEPTION_SUFFIXES: Lazy<Vec<String>> =
    Lazy::new(|| owned(&["_chg", "_z", "_lag1"]));

static DEFAULT_RATIO_TOKENS: Lazy<Vec<String>> = Lazy::new(|| owned(&["rel", "vs"]));

/// Declarative forbidden-feature rules. Evaluated in field order: exact
/// names, prefixes, macro passthrough, then keywords. Every comparison
/// ignores ASCII case.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExclusionRules {
    pub exact: Vec<String>,
    pub prefixes: Vec<String>,
    pub macro_markers: Vec<String>,
    /// Suffixes that mark an eligible derivative of a macro column.
    pub macro_derivative_suffixes: Vec<String>,
    /// Raw price-level names, matched on `_` boundaries.
    pub keywords: Vec<String>,
    pub exception_suffixes: Vec<String>,
    /// A keyword directly after one of these tokens is a denominator
    /// (`Range_rel_close`), not a level.
    pub ratio_tokens: Vec<String>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            exact: DEFAULT_EXACT.clone(),
            prefixes: DEFAULT_PREFIXES.clone(),
            macro_markers: DEFAULT_MACRO_MARKERS.clone(),
            macro_derivative_suffixes: DEFAULT_MACRO_SUFFIXES.clone(),
            keywords: DEFAULT_KEYWORDS.clone(),
            exception_suffixes: DEFAULT_EXCEPTION_SUFFIXES.clone(),
            ratio_tokens: DEFAULT_RATIO_TOKENS.clone(),
        }
    }
}

/// Why a column was removed before the correlation audit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rule", content = "matched", rename_all = "snake_case")]
pub enum Exclusion {
    ExactName(String),
    RawPrefix(String),
    MacroPassthrough(String),
    Keyword(String),
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.as_bytes()[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

fn contains_ignore_case(name: &str, needle: &str) -> bool {
    name.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

/// Byte offsets where `keyword` occurs as a whole run of `_`-delimited
/// tokens. Matching is by token, never by substring: `BB_Lower_20_2` holds
/// no `Low` hit because `Low` is followed by `er` rather than `_` or the end
/// of the name.
///
/// Inside a name the keyword must keep its case, so `days_since_high_20d`
/// stays eligible. As the last token any case matches, which is how merged
/// source columns spell levels (`SPY_close`, `vix_history_CLOSE`).
fn token_starts<'a>(name: &'a str, keyword: &'a str) -> impl Iterator<Item = usize> + 'a {
    let bounded = move |start: usize| {
        let end = start + keyword.len();
        let before_ok = start == 0 || name.as_bytes()[start - 1] == b'_';
        let after_ok = end == name.len() || name.as_bytes()[end] == b'_';
        before_ok && after_ok
    };
    let trailing = (!keyword.is_empty() && ends_with_ignore_case(name, keyword))
        .then(|| name.len() - keyword.len())
        .filter(|start| bounded(*start));
    name.match_indices(keyword)
        .map(|(start, _)| start)
        .filter(move |start| !keyword.is_empty() && bounded(*start))
        .chain(trailing)
}

impl ExclusionRules {
    /// Adds `target` to the exact-name set.
    pub fn with_target(mut self, target: &str) -> Self {
        if !self.exact.iter().any(|name| name.eq_ignore_ascii_case(target)) {
            self.exact.push(target.to_string());
        }
        self
    }

    fn has_suffix(name: &str, suffixes: &[String]) -> bool {
        suffixes.iter().any(|suffix| ends_with_ignore_case(name, suffix))
    }

    fn follows_ratio_token(&self, name: &str, start: usize) -> bool {
        let Some(head) = name[..start].strip_suffix('_') else {
            return false;
        };
        let previous = head.rsplit('_').next().unwrap_or(head);
        self.ratio_tokens
            .iter()
            .any(|token| token.eq_ignore_ascii_case(previous))
    }

    fn keyword_hit(&self, name: &str) -> Option<&String> {
        self.keywords.iter().find(|kw| {
            token_starts(name, kw).any(|start| !self.follows_ratio_token(name, start))
        })
    }

    /// First matching rule, or `None` when the column is eligible.
    pub fn evaluate(&self, name: &str) -> Option<Exclusion> {
        if let Some(exact) = self.exact.iter().find(|exact| exact.eq_ignore_ascii_case(name)) {
            return Some(Exclusion::ExactName(exact.clone()));
        }
        if let Some(prefix) = self
            .prefixes
            .iter()
            .find(|p| starts_with_ignore_case(name, p))
        {
            return Some(Exclusion::RawPrefix(prefix.clone()));
        }
        if let Some(marker) = self
            .macro_markers
            .iter()
            .find(|m| contains_ignore_case(name, m))
        {
            if !Self::has_suffix(name, &self.macro_derivative_suffixes) {
                return Some(Exclusion::MacroPassthrough(marker.clone()));
            }
        }
        match self.keyword_hit(name) {
            Some(keyword) if !Self::has_suffix(name, &self.exception_suffixes) => {
                Some(Exclusion::Keyword(keyword.clone()))
            }
            _ => None,
        }
    }

    /// True when the keyword rule would have matched but an exception suffix
    /// saved the column.
    pub fn kept_by_exception(&self, name: &str) -> bool {
        self.keyword_hit(name).is_some() && Self::has_suffix(name, &self.exception_suffixes)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    /// |corr| above this flags a feature.
    pub flag: f64,
    /// |corr| above this drops a flagged feature unconditionally.
    pub prune: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            flag: 0.8,
            prune: 0.9,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), SelectionError> {
        let ordered = 0.0 <= self.flag && self.flag <= self.prune && self.prune <= 1.0;
        if ordered {
            Ok(())
        } else {
            Err(SelectionError::InvalidThresholds {
                flag: self.flag,
                prune: self.prune,
            })
        }
    }
}

/// Inclusive date range used for the correlation audit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrainWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TrainWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Excluded,
    Retained,
    /// Flagged but at or below the prune threshold and carrying `_lag1`.
    RetainedLagBand,
    PrunedFlagBand,
    PrunedAbovePrune,
}

impl Decision {
    pub fn is_retained(self) -> bool {
        matches!(self, Decision::Retained | Decision::RetainedLagBand)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColumnAudit {
    pub name: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exclusion: Option<Exclusion>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation: Option<f64>,
    #[serde(default)]
    pub kept_by_exception: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SelectionReport {
    pub target: String,
    pub train_window: TrainWindow,
    pub train_rows: usize,
    pub thresholds: Thresholds,
    pub columns: Vec<ColumnAudit>,
    pub retained: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

impl SelectionReport {
    pub fn audit(&self, name: &str) -> Option<&ColumnAudit> {
        self.columns.iter().find(|audit| audit.name == name)
    }
}

const LAG_BAND_SUFFIX: &str = "_lag1";

fn classify(abs_corr: f64, name: &str, thresholds: Thresholds) -> Decision {
    if abs_corr <= thresholds.flag {
        Decision::Retained
    } else if abs_corr > thresholds.prune {
        Decision::PrunedAbovePrune
    } else if name.ends_with(LAG_BAND_SUFFIX) {
        Decision::RetainedLagBand
    } else {
        Decision::PrunedFlagBand
    }
}

#[derive(Clone, Debug)]
pub struct FeatureSelector {
    rules: ExclusionRules,
    thresholds: Thresholds,
}

impl FeatureSelector {
    pub fn new(rules: ExclusionRules, thresholds: Thresholds) -> Result<Self, SelectionError> {
        thresholds.validate()?;
        Ok(Self { rules, thresholds })
    }

    pub fn rules(&self) -> &ExclusionRules {
        &self.rules
    }

    /// Applies the exclusion rules, then prunes survivors by their absolute
    /// Pearson correlation with `target` over rows inside `window` only.
    pub fn select(
        &self,
        panel: &FeaturePanel,
        target: &str,
        window: TrainWindow,
    ) -> Result<SelectionReport, SelectionError> {
        let target_values = panel
            .column(target)
            .ok_or_else(|| SelectionError::MissingTarget(target.to_string()))?;
        let train_rows: Vec<usize> = panel
            .dates()
            .iter()
            .enumerate()
            .filter(|(_, date)| window.contains(**date))
            .map(|(idx, _)| idx)
            .collect();
        if train_rows.len() < 2 {
            return Err(SelectionError::EmptyTrainWindow {
                start: window.start,
                end: window.end,
                rows: train_rows.len(),
            });
        }
        let slice = |values: &[f64]| -> Vec<f64> { train_rows.iter().map(|i| values[*i]).collect() };
        let target_train = slice(target_values);
        let rules = self.rules.clone().with_target(target);

        let mut columns = Vec::with_capacity(panel.width());
        for (name, values) in panel.columns() {
            if let Some(exclusion) = rules.evaluate(name) {
                debug!(column = name, ?exclusion, "Excluded before correlation audit");
                columns.push(ColumnAudit {
                    name: name.to_string(),
                    decision: Decision::Excluded,
                    exclusion: Some(exclusion),
                    correlation: None,
                    kept_by_exception: false,
                });
                continue;
            }
            let corr = pearson(&slice(values), &target_train).unwrap_or(0.0);
            let decision = classify(corr.abs(), name, self.thresholds);
            columns.push(ColumnAudit {
                name: name.to_string(),
                decision,
                exclusion: None,
                correlation: Some(corr),
                kept_by_exception: rules.kept_by_exception(name),
            });
        }

        let retained: Vec<String> = columns
            .iter()
            .filter(|audit| audit.decision.is_retained())
            .map(|audit| audit.name.clone())
            .collect();
        let excluded = columns
            .iter()
            .filter(|audit| audit.decision == Decision::Excluded)
            .count();
        info!(
            total = columns.len(),
            excluded,
            retained = retained.len(),
            train_rows = train_rows.len(),
            train_start = %window.start,
            train_end = %window.end,
            "Feature selection complete"
        );

        Ok(SelectionReport {
            target: target.to_string(),
            train_window: window,
            train_rows: train_rows.len(),
            thresholds: self.thresholds,
            columns,
            retained,
            config_hash: None,
        })
    }
}

/// Loads the panel, runs the selector and writes `selected_features.txt` and
/// `selection_report.json` into the output directory. Both artifacts share the
/// panel's overwrite guard, so a rerun with a different outcome needs
/// `ack_new_df`.
pub fn run_selection(config: &SelectionConfig) -> anyhow::Result<SelectionReport> {
    config.validate()?;
    let frame = read_csv_frame(&config.panel_csv)?;
    let panel = FeaturePanel::from_data_frame(&frame)
        .with_context(|| format!("Invalid feature panel {}", config.panel_csv.display()))?;
    let selector = FeatureSelector::new(config.rules.clone(), config.thresholds())?;
    let mut report = selector.select(&panel, &config.target, config.train_window())?;
    report.config_hash = Some(config.stable_hash()?);

    let list_path = config.output_dir.join(SELECTED_FEATURES_FILE);
    let mut listing = report.retained.join("\n");
    if !listing.is_empty() {
        listing.push('\n');
    }
    write_guarded(listing.as_bytes(), &list_path, config.ack_new_df)?;
    let report_path = config.output_dir.join(SELECTION_REPORT_FILE);
    let json = serde_json::to_string_pretty(&report)?;
    write_guarded(json.as_bytes(), &report_path, config.ack_new_df)?;
    info!(
        retained = report.retained.len(),
        list = %list_path.display(),
        report = %report_path.display(),
        "Selection artifacts written"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_order_decides_reason() {
        let rules = ExclusionRules::default().with_target("SPY_NextDay_Return");
        assert_eq!(
            rules.evaluate("SPY_NextDay_Return"),
            Some(Exclusion::ExactName("SPY_NextDay_Return".into()))
        );
        assert_eq!(
            rules.evaluate("sector_data_Prices_XLK_chg"),
            Some(Exclusion::RawPrefix("sector_data_Prices_".into()))
        );
        assert_eq!(
            rules.evaluate("macro_positioning_data_VIX"),
            Some(Exclusion::MacroPassthrough("macro_positioning_data".into()))
        );
        assert_eq!(rules.evaluate("macro_positioning_data_VIX_ffill"), None);
        assert_eq!(
            rules.evaluate("SPY_High"),
            Some(Exclusion::Keyword("High".into()))
        );
    }

    #[test]
    fn exception_suffix_rescues_keyword_matches_only() {
        let rules = ExclusionRules::default();
        assert_eq!(rules.evaluate("SPY_Close_lag1"), None);
        assert!(rules.kept_by_exception("SPY_Close_lag1"));
        assert_eq!(rules.evaluate("SPY_Close_z"), None);
        assert!(!rules.kept_by_exception("RSI_14"));
    }

    #[test]
    fn keywords_match_whole_name_segments() {
        let rules = ExclusionRules::default();
        assert_eq!(rules.evaluate("BB_Lower_20_2"), None);
        assert_eq!(rules.evaluate("days_since_high_20d"), None);
        assert_eq!(rules.evaluate("Open"), Some(Exclusion::Keyword("Open".into())));
        assert_eq!(
            rules.evaluate("spy_ohlcv_1drth_high"),
            Some(Exclusion::Keyword("ohlcv_1drth_high".into()))
        );
    }

    #[test]
    fn merged_source_levels_match_in_any_case() {
        let rules = ExclusionRules::default();
        assert_eq!(
            rules.evaluate("SPY_close"),
            Some(Exclusion::ExactName("SPY_Close".into()))
        );
        assert_eq!(
            rules.evaluate("spy_fx_flows_close"),
            Some(Exclusion::Keyword("Close".into()))
        );
        assert_eq!(
            rules.evaluate("vix_history_CLOSE"),
            Some(Exclusion::Keyword("Close".into()))
        );
        assert_eq!(
            rules.evaluate("SECTOR_DATA_PRICES_XLF"),
            Some(Exclusion::RawPrefix("sector_data_Prices_".into()))
        );
        assert_eq!(rules.evaluate("SPY_High_Z"), None);
        assert!(rules.kept_by_exception("SPY_High_Z"));
    }

    #[test]
    fn lowercase_levels_inside_derived_names_stay_eligible() {
        let rules = ExclusionRules::default();
        assert_eq!(rules.evaluate("days_since_low_252d"), None);
        assert_eq!(rules.evaluate("Range_rel_close"), None);
        assert_eq!(
            rules.evaluate("Close_rel"),
            Some(Exclusion::Keyword("Close".into()))
        );
    }

    #[test]
    fn thresholds_must_be_ordered() {
        assert!(Thresholds::default().validate().is_ok());
        let bad = Thresholds {
            flag: 0.95,
            prune: 0.9,
        };
        assert_eq!(
            bad.validate(),
            Err(SelectionError::InvalidThresholds {
                flag: 0.95,
                prune: 0.9
            })
        );
    }

    #[test]
    fn band_classification_keeps_only_lag1() {
        let t = Thresholds::default();
        assert_eq!(classify(0.5, "a", t), Decision::Retained);
        assert_eq!(classify(0.8, "a", t), Decision::Retained);
        assert_eq!(classify(0.85, "a", t), Decision::PrunedFlagBand);
        assert_eq!(classify(0.85, "a_lag1", t), Decision::RetainedLagBand);
        assert_eq!(classify(0.9, "a_lag1", t), Decision::RetainedLagBand);
        assert_eq!(classify(0.95, "a_lag1", t), Decision::PrunedAbovePrune);
    }
}
