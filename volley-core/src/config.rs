use crate::constants::{DEFAULT_GRACE, DEFAULT_MAX_METRICS, DEFAULT_TICK};
use crate::error::ConfigError;
use crate::metric::{is_transaction_latency, MetricKind, MetricRef, BUILTIN_METRICS};
use crate::stage::{RampMode, Stage, StageSchedule};
use crate::threshold::Threshold;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

/// Raw run configuration as assembled by the scenario builder methods.
///
/// Nothing here is trusted until [`ScenarioConfig::validate`] turns it into a [`RunPlan`].
#[doc(hidden)]
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub name: String,
    pub stages: Vec<Stage>,
    pub ramp: RampMode,
    /// `(metric, expression, abort_on_fail)`
    pub thresholds: Vec<(String, String, bool)>,
    pub metrics: Vec<(String, MetricKind)>,
    pub tick: Duration,
    pub grace: Duration,
    pub threshold_interval: Option<Duration>,
    pub max_rps: Option<NonZeroU32>,
    pub max_metrics: usize,
}

impl ScenarioConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stages: vec![],
            ramp: RampMode::default(),
            thresholds: vec![],
            metrics: vec![],
            tick: DEFAULT_TICK,
            grace: DEFAULT_GRACE,
            threshold_interval: None,
            max_rps: None,
            max_metrics: DEFAULT_MAX_METRICS,
        }
    }

    pub fn validate(&self) -> Result<RunPlan, ConfigError> {
        let schedule = StageSchedule::new(self.stages.clone(), self.ramp)?;

        if self.tick.is_zero() {
            return Err(ConfigError::InvalidTick(self.tick));
        }
        if let Some(interval) = self.threshold_interval {
            if interval.is_zero() {
                return Err(ConfigError::InvalidThresholdInterval(interval));
            }
        }

        let mut metrics: BTreeMap<MetricRef, MetricKind> = BUILTIN_METRICS
            .iter()
            .map(|(name, kind)| (MetricRef::new(*name), *kind))
            .collect();

        for (name, kind) in &self.metrics {
            let metric = MetricRef::new(name.as_str());
            match metrics.get(&metric) {
                Some(existing) if existing != kind => {
                    return Err(ConfigError::ConflictingMetricKind {
                        name: name.clone(),
                        existing: existing.as_str(),
                        requested: kind.as_str(),
                    })
                }
                _ => {
                    metrics.insert(metric, *kind);
                }
            }
        }

        let mut thresholds = Vec::with_capacity(self.thresholds.len());
        for (metric, expression, abort) in &self.thresholds {
            let threshold = Threshold::parse(metric, expression)?.abort_on_fail(*abort);
            let base = MetricRef::new(threshold.metric.name.as_str());
            let kind = match metrics.get(&base) {
                Some(kind) => *kind,
                // `#[transaction]` latency trends exist without being declared.
                None if is_transaction_latency(&base.name) => {
                    metrics.insert(base, MetricKind::Trend);
                    MetricKind::Trend
                }
                None => return Err(ConfigError::UnknownMetric(threshold.metric.name.clone())),
            };
            threshold.check_kind(kind)?;
            metrics.insert(threshold.metric.clone(), kind);
            thresholds.push(threshold);
        }

        if metrics.len() > self.max_metrics {
            return Err(ConfigError::TooManyMetrics {
                count: metrics.len(),
                limit: self.max_metrics,
            });
        }

        Ok(RunPlan {
            name: self.name.clone(),
            schedule,
            thresholds,
            metrics,
            tick: self.tick,
            grace: self.grace,
            threshold_interval: self.threshold_interval,
            max_rps: self.max_rps,
            max_metrics: self.max_metrics,
        })
    }
}

/// A validated configuration; the only input a run accepts.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub name: String,
    pub schedule: StageSchedule,
    pub thresholds: Vec<Threshold>,
    /// Every metric and submetric known before the run starts.
    pub metrics: BTreeMap<MetricRef, MetricKind>,
    pub tick: Duration,
    pub grace: Duration,
    pub threshold_interval: Option<Duration>,
    pub max_rps: Option<NonZeroU32>,
    pub max_metrics: usize,
}
