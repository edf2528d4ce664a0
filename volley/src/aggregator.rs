//! Concurrent metric accumulation shared by every virtual user of a run.
use arc_swap::ArcSwap;
use metrics_util::AtomicBucket;
use std::collections::{BTreeMap, HashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, trace, warn};
use volley_core::{
    CheckSummary, MetricKind, MetricRef, MetricSample, MetricValue, MetricsSnapshot,
    TrendSummary, BUILTIN_METRICS, CHECKS, CHECK_TAG, DEFAULT_MAX_METRICS,
};

/// Accumulates samples from arbitrarily many units.
///
/// Metric names are fixed before the run starts, so the registry is read without locking.
/// Trend values land in a lock-free bucket and rates/counters are plain atomics; the
/// per-metric summaries are only locked when the buckets are drained, on every controller
/// tick and at snapshot time.
pub struct Aggregator {
    metrics: ArcSwap<HashMap<String, Arc<MetricCell>>>,
    checks: ArcSwap<HashMap<String, Arc<CheckCell>>>,
    limit: usize,
}

impl Aggregator {
    pub fn new(declared: &BTreeMap<MetricRef, MetricKind>, limit: usize) -> Self {
        let mut cells: HashMap<String, MetricCell> = declared
            .iter()
            .filter(|(metric, _)| !metric.is_submetric())
            .map(|(metric, kind)| (metric.name.clone(), MetricCell::new(*kind)))
            .collect();

        let mut submetrics = vec![];
        for (metric, kind) in declared {
            let Some((key, value)) = &metric.tag else {
                continue;
            };
            let sub = Arc::new(MetricCell::new(*kind));
            if let Some(parent) = cells.get_mut(&metric.name) {
                parent
                    .submetrics
                    .push((key.clone(), value.clone(), sub.clone()));
            }
            submetrics.push((metric.to_string(), sub));
        }

        let mut metrics: HashMap<String, Arc<MetricCell>> = cells
            .into_iter()
            .map(|(name, cell)| (name, Arc::new(cell)))
            .collect();
        metrics.extend(submetrics);

        Self {
            metrics: ArcSwap::from_pointee(metrics),
            checks: ArcSwap::from_pointee(HashMap::new()),
            limit,
        }
    }

    pub fn record(&self, sample: &MetricSample) {
        let tags: Vec<(&str, &str)> = sample
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.record_tagged(&sample.name, sample.value, &tags);
    }

    pub fn record_tagged(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if !value.is_finite() {
            warn!("Ignoring non-finite sample {value} for metric `{name}`");
            return;
        }

        let cell = match self.metrics.load().get(name) {
            Some(cell) => cell.clone(),
            None => {
                warn!("Metric `{name}` was not declared before the run; registering it as a trend");
                self.register(name, MetricKind::Trend)
            }
        };
        cell.record(value, tags);
    }

    /// Record into a metric the engine itself owns, registering it silently on first use.
    pub(crate) fn record_owned(
        &self,
        name: &str,
        kind: MetricKind,
        value: f64,
        tags: &[(&str, &str)],
    ) {
        let cell = match self.metrics.load().get(name) {
            Some(cell) => cell.clone(),
            None => self.register(name, kind),
        };
        cell.record(value, tags);
    }

    /// Record the outcome of a named check. Returns `passed` for chaining.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        let cell = match self.checks.load().get(name) {
            Some(cell) => cell.clone(),
            None => self.register_check(name),
        };
        if passed {
            cell.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            cell.fails.fetch_add(1, Ordering::Relaxed);
        }
        self.record_tagged(CHECKS, if passed { 1. } else { 0. }, &[(CHECK_TAG, name)]);
        passed
    }

    /// Fold buffered trend samples into their summaries.
    pub fn drain(&self) {
        for cell in self.metrics.load().values() {
            cell.drain();
        }
    }

    pub fn snapshot(&self, elapsed: Duration) -> MetricsSnapshot {
        let metrics = self
            .metrics
            .load()
            .iter()
            .map(|(name, cell)| (name.clone(), cell.value()))
            .collect();
        let checks = self
            .checks
            .load()
            .iter()
            .map(|(name, cell)| {
                let summary = CheckSummary {
                    passes: cell.passes.load(Ordering::Relaxed),
                    fails: cell.fails.load(Ordering::Relaxed),
                };
                (name.clone(), summary)
            })
            .collect();

        MetricsSnapshot {
            metrics,
            checks,
            elapsed,
        }
    }

    /// Drop every accumulated value. Registered names are kept.
    pub fn reset(&self) {
        for cell in self.metrics.load().values() {
            cell.reset();
        }
        for cell in self.checks.load().values() {
            cell.passes.store(0, Ordering::Relaxed);
            cell.fails.store(0, Ordering::Relaxed);
        }
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.load().len()
    }

    /// Trend samples recorded but not yet folded into a summary.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.metrics
            .load()
            .values()
            .map(|cell| match &cell.store {
                Store::Trend { bucket, .. } => bucket.data().len(),
                _ => 0,
            })
            .sum()
    }

    #[cold]
    fn register(&self, name: &str, kind: MetricKind) -> Arc<MetricCell> {
        self.metrics.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(name.to_string())
                .or_insert_with(|| Arc::new(MetricCell::new(kind)));
            next
        });

        let metrics = self.metrics.load();
        if metrics.len() > self.limit {
            error!(
                "{} distinct metrics recorded, above the configured limit of {}",
                metrics.len(),
                self.limit
            );
        }
        // Present: inserted above and never removed.
        metrics
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(MetricCell::new(kind)))
    }

    #[cold]
    fn register_check(&self, name: &str) -> Arc<CheckCell> {
        debug!("Registering check `{name}`");
        self.checks.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(name.to_string()).or_default();
            next
        });
        self.checks
            .load()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for Aggregator {
    /// An aggregator knowing only the built-in metrics.
    fn default() -> Self {
        let declared = BUILTIN_METRICS
            .iter()
            .map(|(name, kind)| (MetricRef::new(*name), *kind))
            .collect();
        Self::new(&declared, DEFAULT_MAX_METRICS)
    }
}

struct MetricCell {
    store: Store,
    submetrics: Vec<(String, String, Arc<MetricCell>)>,
}

enum Store {
    Trend {
        bucket: AtomicBucket<f64>,
        summary: Mutex<TrendSummary>,
    },
    Rate {
        hits: AtomicU64,
        total: AtomicU64,
    },
    Counter {
        samples: AtomicU64,
        // f64 bits
        sum: AtomicU64,
    },
}

impl MetricCell {
    fn new(kind: MetricKind) -> Self {
        let store = match kind {
            MetricKind::Trend => Store::Trend {
                bucket: AtomicBucket::new(),
                summary: Mutex::new(TrendSummary::new()),
            },
            MetricKind::Rate => Store::Rate {
                hits: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Counter => Store::Counter {
                samples: AtomicU64::new(0),
                sum: AtomicU64::new(0f64.to_bits()),
            },
        };
        Self {
            store,
            submetrics: vec![],
        }
    }

    fn record(&self, value: f64, tags: &[(&str, &str)]) {
        self.store.record(value);
        for (key, tag_value, sub) in &self.submetrics {
            if tags.iter().any(|(k, v)| k == key && v == tag_value) {
                sub.store.record(value);
            }
        }
    }

    fn drain(&self) {
        if let Store::Trend { bucket, summary } = &self.store {
            drain_trend(bucket, summary);
        }
    }

    fn value(&self) -> MetricValue {
        match &self.store {
            Store::Trend { bucket, summary } => {
                MetricValue::Trend(drain_trend(bucket, summary).clone())
            }
            Store::Rate { hits, total } => MetricValue::Rate {
                hits: hits.load(Ordering::Relaxed),
                total: total.load(Ordering::Relaxed),
            },
            Store::Counter { samples, sum } => MetricValue::Counter {
                samples: samples.load(Ordering::Relaxed),
                sum: f64::from_bits(sum.load(Ordering::Relaxed)),
            },
        }
    }

    fn reset(&self) {
        match &self.store {
            Store::Trend { bucket, summary } => {
                let mut summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
                bucket.clear();
                summary.clear();
            }
            Store::Rate { hits, total } => {
                hits.store(0, Ordering::Relaxed);
                total.store(0, Ordering::Relaxed);
            }
            Store::Counter { samples, sum } => {
                samples.store(0, Ordering::Relaxed);
                sum.store(0f64.to_bits(), Ordering::Relaxed);
            }
        }
    }
}

fn drain_trend<'a>(
    bucket: &AtomicBucket<f64>,
    summary: &'a Mutex<TrendSummary>,
) -> MutexGuard<'a, TrendSummary> {
    let mut summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
    bucket.clear_with(|values| summary.extend(values));
    summary
}

impl Store {
    fn record(&self, value: f64) {
        match self {
            Store::Trend { bucket, .. } => bucket.push(value),
            Store::Rate { hits, total } => {
                if value != 0. {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
                total.fetch_add(1, Ordering::Relaxed);
            }
            Store::Counter { samples, sum } => {
                samples.fetch_add(1, Ordering::Relaxed);
                let _ = sum.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                    Some((f64::from_bits(bits) + value).to_bits())
                });
            }
        }
    }
}

#[derive(Default)]
struct CheckCell {
    passes: AtomicU64,
    fails: AtomicU64,
}
