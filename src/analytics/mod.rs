pub mod frequency;
pub mod zscore;

pub use frequency::{detect_frequency, FrequencyClass};
pub use zscore::{
    compute_frequency_aware_zscore, zscore_history, Severity, SeverityBands, Signal, ZScoreResult,
};
