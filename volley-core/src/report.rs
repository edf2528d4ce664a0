use crate::constants::THRESHOLDS_FAILED_EXIT_CODE;
use crate::data::{MetricValue, MetricsSnapshot};
use crate::threshold::ThresholdOutcome;
use serde::Serialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use std::fmt;
use std::time::Duration;

/// Desired and active unit counts at one reconciliation.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConcurrencySample {
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub elapsed: Duration,
    pub desired: usize,
    pub active: usize,
}

/// Final result of a run. Built once when the run reaches `Completed`.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub thresholds: Vec<ThresholdOutcome>,
    pub iterations: u64,
    pub failed_iterations: u64,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub elapsed: Duration,
    pub peak_units: usize,
    /// Units still running when the shutdown grace period ran out.
    pub abandoned_units: usize,
    /// Iterations cut short because their unit was abandoned.
    pub incomplete_iterations: usize,
    /// Set when an `abort_on_fail` threshold ended the run early.
    pub aborted_by: Option<String>,
    /// Concurrency changes over the run; consecutive duplicates are collapsed.
    pub timeline: Vec<ConcurrencySample>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    pub fn is_incomplete(&self) -> bool {
        self.abandoned_units > 0
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.snapshot.metric(name)
    }

    /// `0` when every threshold passed.
    pub fn exit_code(&self) -> u8 {
        if self.passed() {
            0
        } else {
            THRESHOLDS_FAILED_EXIT_CODE
        }
    }
}

impl From<&RunReport> for std::process::ExitCode {
    fn from(report: &RunReport) -> Self {
        std::process::ExitCode::from(report.exit_code())
    }
}

fn opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scenario {}: {} elapsed, {} iterations ({} failed), peak {} units",
            self.name,
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64)),
            self.iterations,
            self.failed_iterations,
            self.peak_units,
        )?;
        if let Some(threshold) = &self.aborted_by {
            writeln!(f, "  aborted early: threshold {threshold} failed")?;
        }
        if self.is_incomplete() {
            writeln!(
                f,
                "  {} units abandoned after the grace period, {} iterations incomplete",
                self.abandoned_units, self.incomplete_iterations
            )?;
        }

        if !self.thresholds.is_empty() {
            writeln!(f, "thresholds")?;
            for t in &self.thresholds {
                writeln!(
                    f,
                    "  [{}] {} {} (observed {})",
                    if t.passed { "PASS" } else { "FAIL" },
                    t.metric,
                    t.expression,
                    opt(t.observed),
                )?;
            }
        }

        if !self.snapshot.checks.is_empty() {
            writeln!(f, "checks")?;
            for (name, check) in &self.snapshot.checks {
                writeln!(
                    f,
                    "  {:>7.2}% {} ({}/{})",
                    check.pass_rate() * 100.,
                    name,
                    check.passes,
                    check.total(),
                )?;
            }
        }

        writeln!(f, "metrics")?;
        for (name, value) in &self.snapshot.metrics {
            match value {
                MetricValue::Trend(t) => writeln!(
                    f,
                    "  {name}: count={} avg={} min={} p(50)={} p(90)={} p(95)={} p(99)={} max={}",
                    t.count(),
                    opt(t.mean()),
                    opt(t.min()),
                    opt(t.percentile(50.)),
                    opt(t.percentile(90.)),
                    opt(t.percentile(95.)),
                    opt(t.percentile(99.)),
                    opt(t.max()),
                )?,
                MetricValue::Rate { hits, total } => writeln!(
                    f,
                    "  {name}: rate={} ({hits}/{total})",
                    opt(value.rate(self.elapsed)),
                )?,
                MetricValue::Counter { sum, .. } => writeln!(
                    f,
                    "  {name}: count={sum} rate={}/s",
                    opt(value.rate(self.elapsed)),
                )?,
            }
        }
        Ok(())
    }
}
