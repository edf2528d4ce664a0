use crate::constants::EXACT_PERCENTILE_LIMIT;
use crate::metric::{MetricKind, MetricRef};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Ratio between the bounds of consecutive histogram buckets.
const BUCKET_GROWTH: f64 = 1.01;
/// Values with a magnitude at or below this share the zero bucket.
const BUCKET_ZERO: f64 = 1e-9;

/// Distribution of a trend metric.
///
/// Every value is kept (sorted) until `EXACT_PERCENTILE_LIMIT` is reached and percentiles are
/// exact, interpolated linearly between the closest ranks. Past the limit the sorted values are
/// dropped and percentiles come from a log-bucketed histogram fed alongside.
///
/// Histogram percentiles return the largest value seen in the bucket holding the requested
/// rank. They are never below the exact percentile and at most 1% above the sample at that
/// rank (values within `1e-9` of zero share one bucket). Adding samples above a reported percentile never
/// lowers it, including across the switch.
#[derive(Debug, Clone)]
pub struct TrendSummary {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    exact: Option<Vec<f64>>,
    histogram: LogHistogram,
}

impl Default for TrendSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl TrendSummary {
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            exact: Some(Vec::new()),
            histogram: LogHistogram::default(),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.accumulate(value);
        if let Some(exact) = &mut self.exact {
            let idx = exact.partition_point(|v| *v <= value);
            exact.insert(idx, value);
        }
        self.check_exact_limit();
    }

    /// Push a batch of values with a single sort.
    pub fn extend(&mut self, values: &[f64]) {
        for value in values {
            self.accumulate(*value);
        }
        if let Some(exact) = &mut self.exact {
            exact.extend_from_slice(values);
            exact.sort_by(f64::total_cmp);
        }
        self.check_exact_limit();
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_exact(&self) -> bool {
        self.exact.is_some()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Value below which `p` percent of samples fall, `p` in `[0, 100]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let q = (p / 100.).clamp(0., 1.);

        let value = match &self.exact {
            Some(sorted) => {
                let rank = q * (sorted.len() - 1) as f64;
                let lo = rank.floor() as usize;
                let hi = rank.ceil() as usize;
                sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
            }
            None => {
                let rank = (q * (self.count - 1) as f64).ceil() as u64;
                self.histogram.at_rank(rank).unwrap_or(self.max)
            }
        };

        Some(value.clamp(self.min, self.max))
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.)
    }

    fn accumulate(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.histogram.insert(value);
    }

    fn check_exact_limit(&mut self) {
        if self.exact.as_ref().is_some_and(|v| v.len() > EXACT_PERCENTILE_LIMIT) {
            tracing::debug!(
                "Trend exceeded {EXACT_PERCENTILE_LIMIT} samples, switching to bucketed percentiles"
            );
            self.exact = None;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    max: f64,
}

/// Sparse histogram over log-spaced buckets, symmetric around zero.
#[derive(Debug, Clone, Default)]
struct LogHistogram {
    buckets: BTreeMap<i32, Bucket>,
}

impl LogHistogram {
    fn insert(&mut self, value: f64) {
        let bucket = self.buckets.entry(bucket_key(value)).or_insert(Bucket {
            count: 0,
            max: value,
        });
        bucket.count += 1;
        bucket.max = bucket.max.max(value);
    }

    /// Largest value in the bucket holding the 0-based `rank`-th smallest sample.
    fn at_rank(&self, rank: u64) -> Option<f64> {
        let mut seen = 0;
        for bucket in self.buckets.values() {
            seen += bucket.count;
            if seen > rank {
                return Some(bucket.max);
            }
        }
        None
    }
}

/// Non-decreasing in `value`: bucket `k > 0` holds `[z·g^(k-1), z·g^k)`, `0` holds `[-z, z]`
/// and negative keys mirror the positive ones.
fn bucket_key(value: f64) -> i32 {
    let magnitude = value.abs();
    if magnitude <= BUCKET_ZERO {
        return 0;
    }
    let k = 1 + ((magnitude / BUCKET_ZERO).ln() / BUCKET_GROWTH.ln()).floor() as i32;
    if value > 0. {
        k
    } else {
        -k
    }
}

/// Accumulated value of one metric at snapshot time.
#[derive(Debug, Clone)]
pub enum MetricValue {
    Trend(TrendSummary),
    Rate { hits: u64, total: u64 },
    Counter { samples: u64, sum: f64 },
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Trend(_) => MetricKind::Trend,
            MetricValue::Rate { .. } => MetricKind::Rate,
            MetricValue::Counter { .. } => MetricKind::Counter,
        }
    }

    /// Number of samples recorded; for counters, the running sum.
    pub fn count(&self) -> f64 {
        match self {
            MetricValue::Trend(trend) => trend.count() as f64,
            MetricValue::Rate { total, .. } => *total as f64,
            MetricValue::Counter { sum, .. } => *sum,
        }
    }

    /// Fraction of non-zero samples for rates; per-second throughput for counters.
    pub fn rate(&self, elapsed: Duration) -> Option<f64> {
        match self {
            MetricValue::Trend(_) => None,
            MetricValue::Rate { hits, total } => Some(if *total == 0 {
                0.
            } else {
                *hits as f64 / *total as f64
            }),
            MetricValue::Counter { sum, .. } => Some(if elapsed.is_zero() {
                0.
            } else {
                sum / elapsed.as_secs_f64()
            }),
        }
    }

    pub fn trend(&self) -> Option<&TrendSummary> {
        match self {
            MetricValue::Trend(trend) => Some(trend),
            _ => None,
        }
    }

    fn row(&self, elapsed: Duration) -> MetricRow {
        match self {
            MetricValue::Trend(t) => MetricRow {
                kind: MetricKind::Trend,
                count: t.count() as f64,
                mean: t.mean(),
                min: t.min(),
                max: t.max(),
                p50: t.percentile(50.),
                p90: t.percentile(90.),
                p95: t.percentile(95.),
                p99: t.percentile(99.),
                rate: None,
            },
            MetricValue::Rate { .. } | MetricValue::Counter { .. } => MetricRow {
                kind: self.kind(),
                count: self.count(),
                rate: self.rate(elapsed),
                ..MetricRow::default_for(self.kind())
            },
        }
    }
}

#[derive(Serialize)]
struct MetricRow {
    kind: MetricKind,
    count: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p50: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p90: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p95: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p99: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate: Option<f64>,
}

impl MetricRow {
    fn default_for(kind: MetricKind) -> Self {
        Self {
            kind,
            count: 0.,
            mean: None,
            min: None,
            max: None,
            p50: None,
            p90: None,
            p95: None,
            p99: None,
            rate: None,
        }
    }
}

/// Pass/fail tally of one named check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            0.
        } else {
            self.passes as f64 / self.total() as f64
        }
    }
}

/// Point-in-time view of every metric and check.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub metrics: BTreeMap<String, MetricValue>,
    pub checks: BTreeMap<String, CheckSummary>,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    pub fn get(&self, metric: &MetricRef) -> Option<&MetricValue> {
        self.metrics.get(&metric.to_string())
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn check(&self, name: &str) -> Option<&CheckSummary> {
        self.checks.get(name)
    }
}

impl Serialize for MetricsSnapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let metrics: BTreeMap<&str, MetricRow> = self
            .metrics
            .iter()
            .map(|(name, value)| (name.as_str(), value.row(self.elapsed)))
            .collect();

        let mut s = serializer.serialize_struct("MetricsSnapshot", 2)?;
        s.serialize_field("metrics", &metrics)?;
        s.serialize_field("checks", &self.checks)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn assert_ordered(t: &TrendSummary) {
        let p = |x| t.percentile(x).unwrap();
        assert!(t.min().unwrap() <= p(50.));
        assert!(p(50.) <= p(90.));
        assert!(p(90.) <= p(95.));
        assert!(p(95.) <= p(99.));
        assert!(p(99.) <= t.max().unwrap());
    }

    #[test]
    fn empty_trend() {
        let t = TrendSummary::new();
        assert!(t.is_empty());
        assert_eq!(t.mean(), None);
        assert_eq!(t.percentile(95.), None);
    }

    #[test]
    fn exact_percentiles() {
        let mut t = TrendSummary::new();
        t.extend(&(1..=100).rev().map(f64::from).collect::<Vec<_>>());
        assert_eq!(t.count(), 100);
        assert!(t.is_exact());
        assert_eq!(t.min(), Some(1.));
        assert_eq!(t.max(), Some(100.));
        assert_eq!(t.mean(), Some(50.5));
        assert_eq!(t.percentile(0.), Some(1.));
        assert_eq!(t.percentile(100.), Some(100.));
        assert!((t.percentile(95.).unwrap() - 95.05).abs() < 1e-9);
        assert_ordered(&t);
    }

    #[test]
    fn push_keeps_order() {
        let mut t = TrendSummary::new();
        for v in [5., 1., 3., 2., 4.] {
            t.push(v);
        }
        assert_eq!(t.median(), Some(3.));
    }

    #[tracing_test::traced_test]
    #[test]
    fn bucketed_percentiles_are_ordered_and_bounded() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut t = TrendSummary::new();
        let values: Vec<f64> = (0..EXACT_PERCENTILE_LIMIT + 1_000)
            .map(|_| rng.gen_range(10.0..250.0))
            .collect();
        t.extend(&values);
        assert!(!t.is_exact());
        assert_eq!(t.count() as usize, values.len());
        assert_ordered(&t);

        let p95 = t.percentile(95.).unwrap();
        assert!(p95 > 200. && p95 < 250., "{p95}");
        assert!(logs_contain("switching to bucketed percentiles"));
    }

    /// Interpolated percentile and the sample at the upper rank.
    fn exact_percentile(sorted: &[f64], p: f64) -> (f64, f64) {
        let rank = p / 100. * (sorted.len() - 1) as f64;
        let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
        let value = sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64);
        (value, sorted[hi])
    }

    /// Mostly 40-60ms with a long tail, like a healthy service with occasional stalls.
    fn skewed(rng: &mut SmallRng, n: usize) -> Vec<f64> {
        (0..n)
            .map(|_| {
                if rng.gen_bool(0.93) {
                    rng.gen_range(40.0..60.0)
                } else {
                    rng.gen_range(100.0..5_000.0)
                }
            })
            .collect()
    }

    #[test]
    fn p95_does_not_drop_across_the_exact_limit() {
        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut t = TrendSummary::new();
            t.extend(&skewed(&mut rng, EXACT_PERCENTILE_LIMIT));
            assert!(t.is_exact());

            let mut last = t.percentile(95.).unwrap();
            for _ in 0..10 {
                t.push(last + 0.5);
                let now = t.percentile(95.).unwrap();
                assert!(now >= last, "seed {seed}: p95 dropped from {last} to {now}");
                last = now;
            }
            assert!(!t.is_exact());
        }
    }

    #[test]
    fn bucketed_percentiles_stay_within_one_percent() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut values = skewed(&mut rng, EXACT_PERCENTILE_LIMIT * 2);
        values.extend((0..1_000).map(|_| rng.gen_range(-5.0..0.0)));
        values.push(0.);

        let mut t = TrendSummary::new();
        t.extend(&values);
        assert!(!t.is_exact());
        values.sort_by(f64::total_cmp);

        for p in [1., 50., 90., 95., 99., 99.9] {
            let (exact, at_rank) = exact_percentile(&values, p);
            let estimate = t.percentile(p).unwrap();
            assert!(estimate >= exact, "p({p}): {estimate} < {exact}");
            assert!(
                estimate - at_rank <= at_rank.abs() * 0.01 + 1e-9,
                "p({p}): {estimate} vs {at_rank}"
            );
        }
        assert_ordered(&t);
    }

    #[test]
    fn p95_does_not_drop_when_larger_values_arrive() {
        let mut t = TrendSummary::new();
        t.extend(&[50.; 100]);
        let before = t.percentile(95.).unwrap();
        t.extend(&[400.; 20]);
        assert!(t.percentile(95.).unwrap() >= before);
    }

    #[test]
    fn rate_and_counter_values() {
        let rate = MetricValue::Rate { hits: 1, total: 10 };
        assert_eq!(rate.rate(Duration::ZERO), Some(0.1));
        assert_eq!(rate.count(), 10.);

        let empty = MetricValue::Rate { hits: 0, total: 0 };
        assert_eq!(empty.rate(Duration::ZERO), Some(0.));

        let counter = MetricValue::Counter { samples: 3, sum: 30. };
        assert_eq!(counter.count(), 30.);
        assert_eq!(counter.rate(Duration::from_secs(10)), Some(3.));
    }

    #[test]
    fn check_pass_rate() {
        let c = CheckSummary { passes: 3, fails: 1 };
        assert_eq!(c.total(), 4);
        assert_eq!(c.pass_rate(), 0.75);
    }

    #[test]
    fn snapshot_serializes_rows() {
        let mut trend = TrendSummary::new();
        trend.extend(&[10., 20.]);
        let mut snapshot = MetricsSnapshot::default();
        snapshot.metrics.insert("lat".into(), MetricValue::Trend(trend));
        snapshot
            .metrics
            .insert("failed".into(), MetricValue::Rate { hits: 0, total: 2 });

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["metrics"]["lat"]["kind"], "trend");
        assert_eq!(json["metrics"]["lat"]["mean"], 15.);
        assert_eq!(json["metrics"]["failed"]["rate"], 0.);
        assert!(json["metrics"]["failed"].get("p95").is_none());
    }
}
