#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod aggregator;
mod controller;
mod outcome;
mod pool;
pub mod scenario;
mod timer;
#[doc(hidden)]
pub mod transaction;

pub use aggregator::Aggregator;
pub use controller::{RunController, RunState};
pub use outcome::IterationOutcome;
pub use pool::{ShutdownStats, VirtualUserPool};
pub use scenario::Scenario;
pub use transaction::{check, record, record_sample, unit_id};
pub use volley_macros::{scenario, transaction};

/// Types shared with the reporting side: stages, metrics, thresholds and the run report.
pub use volley_core as core;

pub mod prelude {
    pub use crate::scenario::ConfigurableScenario;
    pub use crate::{check, record, record_sample, IterationOutcome};
    pub use volley_core::{
        ConfigError, MetricKind, MetricSample, RampMode, RunReport, Stage,
    };
    pub use volley_macros::{scenario, transaction};
}
