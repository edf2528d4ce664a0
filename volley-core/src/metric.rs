use crate::error::ConfigError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Time spent on a single request, in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Rate of requests which returned an error.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Number of requests issued.
pub const HTTP_REQS: &str = "http_reqs";
/// Time spent on one full scenario invocation, in milliseconds.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Number of completed scenario invocations.
pub const ITERATIONS: &str = "iterations";
/// Rate of scenario invocations which returned an error or panicked.
pub const ITERATION_FAILED: &str = "iteration_failed";
/// Pass rate across every recorded check.
pub const CHECKS: &str = "checks";

/// Check recorded once per iteration; fails when the scenario returns an error.
pub const ITERATION_CHECK: &str = "iteration completed";

/// Tag carrying the check name on samples of the `checks` rate.
pub const CHECK_TAG: &str = "check";
/// Tag carrying the transaction name on request samples.
pub const NAME_TAG: &str = "name";

pub const BUILTIN_METRICS: [(&str, MetricKind); 7] = [
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (HTTP_REQS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_FAILED, MetricKind::Rate),
    (CHECKS, MetricKind::Rate),
];

/// How samples of a metric are accumulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Distribution of values: count, mean, min, max and percentiles.
    Trend,
    /// Fraction of non-zero samples.
    Rate,
    /// Running sum.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Trend => "trend",
            MetricKind::Rate => "rate",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation emitted by a scenario or by the transaction hook.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A metric, optionally narrowed to the samples carrying one tag: `name` or `name{key:value}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricRef {
    pub name: String,
    pub tag: Option<(String, String)>,
}

impl MetricRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
        }
    }

    pub fn with_tag(name: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: Some((key.into(), value.into())),
        }
    }

    pub fn is_submetric(&self) -> bool {
        self.tag.is_some()
    }
}

impl FromStr for MetricRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidMetricRef(s.to_string());
        let s_trim = s.trim();

        let Some(open) = s_trim.find('{') else {
            if s_trim.is_empty() || s_trim.contains('}') {
                return Err(invalid());
            }
            return Ok(MetricRef::new(s_trim));
        };

        let name = s_trim[..open].trim();
        let rest = s_trim[open + 1..].strip_suffix('}').ok_or_else(invalid)?;
        let (key, value) = rest.split_once(':').ok_or_else(invalid)?;
        let (key, value) = (key.trim(), value.trim());
        if name.is_empty() || key.is_empty() || value.is_empty() {
            return Err(invalid());
        }
        Ok(MetricRef::with_tag(name, key, value))
    }
}

impl fmt::Display for MetricRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some((key, value)) => write!(f, "{}{{{}:{}}}", self.name, key, value),
            None => f.write_str(&self.name),
        }
    }
}

/// Suffix of the per-transaction latency trend. Must match [`generate_labels!`].
pub const LATENCY_SUFFIX: &str = "_duration";

/// Whether `name` could be the latency trend of some `#[transaction]`.
///
/// Such a metric is created on first record, so thresholds may name it without declaring it.
pub fn is_transaction_latency(name: &str) -> bool {
    name.strip_suffix(LATENCY_SUFFIX)
        .is_some_and(|base| !base.is_empty())
}

/// Metric names used by one transaction. Generated by the `#[transaction]` macro.
#[derive(Copy, Clone, Debug)]
pub struct TransactionLabels {
    pub name: &'static str,
    pub success: &'static str,
    pub error: &'static str,
    pub latency: &'static str,
}

#[macro_export]
macro_rules! generate_labels {
    ($base_name:literal) => {
        $crate::TransactionLabels {
            name: $base_name,
            success: concat!($base_name, "_success"),
            error: concat!($base_name, "_error"),
            latency: concat!($base_name, "_duration"),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_ref() {
        let r: MetricRef = "http_req_duration".parse().unwrap();
        assert_eq!(r, MetricRef::new("http_req_duration"));
        assert!(!r.is_submetric());
    }

    #[test]
    fn parse_tagged_ref() {
        let r: MetricRef = "http_req_duration{name: create_user}".parse().unwrap();
        assert_eq!(r, MetricRef::with_tag("http_req_duration", "name", "create_user"));
        assert_eq!(r.to_string(), "http_req_duration{name:create_user}");

        let r: MetricRef = "checks{check:POST status is 200 or 201}".parse().unwrap();
        assert_eq!(r.tag.unwrap().1, "POST status is 200 or 201");
    }

    #[test]
    fn reject_malformed_ref() {
        for bad in ["", "a{", "a{b}", "{b:c}", "a{b:}", "a}b"] {
            assert!(bad.parse::<MetricRef>().is_err(), "{bad}");
        }
    }

    #[test]
    fn labels_macro() {
        let labels = generate_labels!("create_user");
        assert_eq!(labels.name, "create_user");
        assert_eq!(labels.latency, "create_user_duration");
        assert_eq!(labels.error, "create_user_error");
    }

    #[test]
    fn transaction_latency_names() {
        let labels = generate_labels!("create_user");
        assert!(is_transaction_latency(labels.latency));
        assert!(!is_transaction_latency("_duration"));
        assert!(!is_transaction_latency(labels.success));
    }
}
