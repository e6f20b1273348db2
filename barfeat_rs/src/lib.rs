pub mod bars;
pub mod config;
pub mod dates;
pub mod error;
pub mod ewm;
pub mod feature;
pub mod intraday;
pub mod labels;
pub mod ops;
pub mod panel;
pub mod rolling;
pub mod selection;
pub mod sentiment;
pub mod sources;
pub mod storage;

pub use bars::{Bar, BarSeries, NormalizeOptions, normalize_frame};
pub use config::{FeatureConfig, IntradayConfig, MergeConfig, SelectionConfig, Suite};
pub use error::{SchemaError, SelectionError};
pub use feature::{FeatureDescriptor, FeatureKind, Formula};
pub use panel::FeaturePanel;
pub use rolling::{PairStat, RollingStat, Window};
pub use selection::{
    ExclusionRules, FeatureSelector, SelectionReport, Thresholds, TrainWindow, run_selection,
};
