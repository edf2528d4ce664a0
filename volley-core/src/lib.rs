#![cfg_attr(docsrs, feature(doc_cfg))]
//! Core types shared by the volley engine: stage tables, metric summaries, threshold
//! expressions, run configuration and the final report.
mod config;
mod constants;
mod data;
mod error;
mod metric;
mod report;
mod stage;
pub mod threshold;

pub use config::*;
pub use constants::*;
pub use data::*;
pub use error::*;
pub use metric::*;
pub use report::*;
pub use stage::*;
pub use threshold::{evaluate, Threshold, ThresholdOutcome};
