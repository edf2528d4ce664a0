//! Threshold expressions: a closed grammar parsed once before a run starts.
//!
//! ```text
//! threshold   := aggregation op number
//! aggregation := "p(" number ")" | "rate" | "count" | "avg" | "mean" | "min" | "max" | "med"
//! op          := "<" | "<=" | ">" | ">=" | "==" | "!="
//! ```
use crate::data::{MetricValue, MetricsSnapshot};
use crate::error::ConfigError;
use crate::metric::{MetricKind, MetricRef};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aggregation {
    /// `p(N)`, N in `[0, 100]`.
    Percentile(f64),
    Rate,
    Count,
    Mean,
    Min,
    Max,
    Median,
}

impl Aggregation {
    fn supports(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Count => true,
            Aggregation::Rate => matches!(kind, MetricKind::Rate | MetricKind::Counter),
            Aggregation::Percentile(_)
            | Aggregation::Mean
            | Aggregation::Min
            | Aggregation::Max
            | Aggregation::Median => kind == MetricKind::Trend,
        }
    }

    fn observe(&self, value: Option<&MetricValue>, snapshot: &MetricsSnapshot) -> Option<f64> {
        let Some(value) = value else {
            // Nothing was ever recorded for this metric.
            return match self {
                Aggregation::Count | Aggregation::Rate => Some(0.),
                _ => None,
            };
        };

        match self {
            Aggregation::Count => Some(value.count()),
            Aggregation::Rate => value.rate(snapshot.elapsed),
            Aggregation::Percentile(p) => value.trend()?.percentile(*p),
            Aggregation::Mean => value.trend()?.mean(),
            Aggregation::Min => value.trend()?.min(),
            Aggregation::Max => value.trend()?.max(),
            Aggregation::Median => value.trend()?.median(),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Percentile(p) => write!(f, "p({p})"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Mean => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Median => f.write_str("med"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Predicate {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
}

impl Predicate {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();

        let (aggregation, rest) = parse_aggregation(&compact)?;
        let (comparison, rest) = parse_comparison(rest)?;
        let bound: f64 = rest
            .parse()
            .map_err(|_| format!("`{rest}` is not a number"))?;
        if !bound.is_finite() {
            return Err(format!("`{rest}` is not a finite number"));
        }

        Ok(Self {
            aggregation,
            comparison,
            bound,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparison.as_str(), self.bound)
    }
}

fn parse_aggregation(input: &str) -> Result<(Aggregation, &str), String> {
    if let Some(rest) = input.strip_prefix("p(") {
        let close = rest
            .find(')')
            .ok_or_else(|| "unterminated `p(`".to_string())?;
        let p: f64 = rest[..close]
            .parse()
            .map_err(|_| format!("`{}` is not a percentile", &rest[..close]))?;
        if !(0. ..=100.).contains(&p) {
            return Err(format!("percentile {p} is outside [0, 100]"));
        }
        return Ok((Aggregation::Percentile(p), &rest[close + 1..]));
    }

    let end = input
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(input.len());
    let aggregation = match &input[..end] {
        "rate" => Aggregation::Rate,
        "count" => Aggregation::Count,
        "avg" | "mean" => Aggregation::Mean,
        "min" => Aggregation::Min,
        "max" => Aggregation::Max,
        "med" => Aggregation::Median,
        "" => return Err("missing aggregation".to_string()),
        other => return Err(format!("unknown aggregation `{other}`")),
    };
    Ok((aggregation, &input[end..]))
}

fn parse_comparison(input: &str) -> Result<(Comparison, &str), String> {
    const OPS: [(&str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];
    OPS.iter()
        .find_map(|(op, cmp)| input.strip_prefix(op).map(|rest| (*cmp, rest)))
        .ok_or_else(|| format!("expected a comparison operator at `{input}`"))
}

/// A parsed threshold bound to one metric.
#[derive(Clone, Debug, PartialEq)]
pub struct Threshold {
    pub metric: MetricRef,
    pub source: String,
    pub predicate: Predicate,
    /// Stop the run early once this threshold is seen failing.
    pub abort_on_fail: bool,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let metric_ref: MetricRef = metric.parse()?;
        let predicate =
            Predicate::parse(expression).map_err(|reason| ConfigError::InvalidThreshold {
                metric: metric.to_string(),
                expression: expression.to_string(),
                reason,
            })?;

        Ok(Self {
            metric: metric_ref,
            source: expression.trim().to_string(),
            predicate,
            abort_on_fail: false,
        })
    }

    pub fn abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    /// Reject aggregations the metric kind cannot answer, e.g. `p(95)` on a rate.
    pub fn check_kind(&self, kind: MetricKind) -> Result<(), ConfigError> {
        if self.predicate.aggregation.supports(kind) {
            Ok(())
        } else {
            Err(ConfigError::AggregationMismatch {
                metric: self.metric.to_string(),
                kind: kind.as_str(),
                aggregation: self.predicate.aggregation.to_string(),
            })
        }
    }
}

/// Result of evaluating one threshold against a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    /// `None` when the aggregation has nothing to observe (an empty trend).
    pub observed: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub abort_on_fail: bool,
}

/// Evaluate every threshold against `snapshot`. Pure: equal inputs give equal outcomes.
///
/// A threshold whose aggregation has no observation passes.
pub fn evaluate(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> Vec<ThresholdOutcome> {
    thresholds
        .iter()
        .map(|threshold| {
            let Predicate {
                aggregation,
                comparison,
                bound,
            } = threshold.predicate;
            let observed = aggregation.observe(snapshot.get(&threshold.metric), snapshot);
            let passed = observed.map_or(true, |v| comparison.holds(v, bound));

            ThresholdOutcome {
                metric: threshold.metric.to_string(),
                expression: threshold.source.clone(),
                passed,
                observed,
                abort_on_fail: threshold.abort_on_fail,
            }
        })
        .collect()
}
