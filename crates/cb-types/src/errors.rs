use thiserror::Error;

/// Main error type for the CurveBound engine.
///
/// Numeric corruption (NaN/Inf statistics) and non-convergence are *not*
/// errors: they surface as flags on the affected data point or result.
/// Cancellation is not an error either; interrupted runs return their
/// partial results.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Grid step must be positive for dimension {dimension}: got {step}")]
    ZeroStep { dimension: usize, step: f64 },

    #[error("Parameter count mismatch: model exposes {expected} slots, got {got}")]
    ParameterMismatch { expected: usize, got: usize },

    #[error("No varied parameters: nothing to search")]
    NoVariedParameters,

    #[error("Statistic index {index} out of range ({len} statistics available)")]
    StatisticOutOfRange { index: usize, len: usize },

    #[error("Empty sample passed to {0}")]
    EmptySample(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type used throughout the CurveBound crates.
pub type CbResult<T> = Result<T, SearchError>;
