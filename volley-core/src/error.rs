use std::time::Duration;
use thiserror::Error;

/// Errors which prevent a run from leaving the `Idle` state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Stage list is empty; at least one stage is required")]
    EmptyStages,

    #[error("Reconciliation tick must be positive, got {0:?}")]
    InvalidTick(Duration),

    #[error("Threshold evaluation interval must be positive, got {0:?}")]
    InvalidThresholdInterval(Duration),

    #[error("Threshold `{expression}` on `{metric}` could not be parsed: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("Metric reference `{0}` is malformed")]
    InvalidMetricRef(String),

    #[error("Threshold references unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("Aggregation `{aggregation}` is not supported on {kind} metric `{metric}`")]
    AggregationMismatch {
        metric: String,
        kind: &'static str,
        aggregation: String,
    },

    #[error("Metric `{name}` declared as {existing} and again as {requested}")]
    ConflictingMetricKind {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("{count} distinct metrics declared, limit is {limit}")]
    TooManyMetrics { count: usize, limit: usize },
}

/// Error returned when a `duration:target` stage string cannot be parsed.
#[derive(Debug, Error)]
pub enum StageParseError {
    #[error("Expected `<duration>:<target>`, got `{0}`")]
    Format(String),

    #[error("Invalid stage duration: {0}")]
    Duration(#[from] humantime::DurationError),

    #[error("Invalid stage target: {0}")]
    Target(#[from] std::num::ParseIntError),
}
