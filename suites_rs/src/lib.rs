//! Daily OHLCV feature suites on top of the `barfeat_rs` rolling engine.

mod engineer;
pub mod gaps;
pub mod indicators;
pub mod liquidity;
pub mod trend;
pub mod volatility;

use barfeat_rs::{FeatureDescriptor, Suite};

pub use engineer::{
    EngineeredPanel, FeatureEngineer, compute_suite, compute_suites, prepare_features,
};

/// Column descriptors a suite emits, in emission order.
pub fn suite_catalog(suite: Suite) -> &'static [FeatureDescriptor] {
    match suite {
        Suite::Indicators => indicators::catalog(),
        Suite::Gaps => gaps::catalog(),
        Suite::Volatility => volatility::catalog(),
        Suite::Liquidity => liquidity::catalog(),
        Suite::Trend => trend::catalog(),
    }
}

/// Rendered column names for `suites`, first occurrence wins.
pub fn feature_names(suites: &[Suite]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for suite in suites {
        for descriptor in suite_catalog(*suite) {
            let name = descriptor.name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}
