use crate::aggregator::Aggregator;
use governor::DefaultDirectRateLimiter;
use std::{future::Future, sync::Arc};
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{
    MetricKind, MetricSample, TransactionLabels, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    NAME_TAG,
};

/// Transaction hook used by the `#[transaction]` macro. Not intended to be used manually.
///
/// Times `func` into `http_req_duration` (tagged with the transaction name) and
/// `<name>_duration`, and records an `Err` output into `http_req_failed`.
pub async fn transaction_hook<T, R, E>(labels: TransactionLabels, func: T) -> T::Output
where
    T: Future<Output = Result<R, E>>,
{
    if let Ok(hook) = TRANSACTION_HOOK.try_with(|v| v.clone()) {
        if let Some(limiter) = &hook.limiter {
            limiter.until_ready().await;
        }

        let start = Instant::now();
        let res = func.await;
        let elapsed = start.elapsed();
        let millis = elapsed.as_secs_f64() * 1_000.;
        let tags = [(NAME_TAG, labels.name)];

        let agg = &hook.aggregator;
        agg.record_tagged(HTTP_REQ_DURATION, millis, &tags);
        agg.record_owned(labels.latency, MetricKind::Trend, millis, &[]);
        agg.record_tagged(HTTP_REQS, 1., &tags);
        agg.record_tagged(HTTP_REQ_FAILED, if res.is_ok() { 0. } else { 1. }, &tags);

        #[cfg(feature = "metrics")]
        {
            metrics::histogram!(labels.latency).record(elapsed.as_secs_f64());
            if res.is_ok() {
                metrics::counter!(labels.success).increment(1);
            } else {
                metrics::counter!(labels.error).increment(1);
            }
        }

        trace!(unit = hook.unit, "{} finished in {millis:.2}ms", labels.name);
        res
    } else {
        error!("No hook available.");
        func.await
    }
}

/// Record the outcome of a named check in the running scenario. Returns `passed`.
///
/// ```no_run
/// # async fn get() -> u16 { 200 }
/// # async fn doc() {
/// let status = get().await;
/// volley::check("status is 200", status == 200);
/// # }
/// ```
pub fn check(name: &str, passed: bool) -> bool {
    match TRANSACTION_HOOK.try_with(|hook| hook.aggregator.check(name, passed)) {
        Ok(passed) => passed,
        Err(_) => {
            warn!("No hook available; check `{name}` not recorded.");
            passed
        }
    }
}

/// Record one untagged value into a named metric.
pub fn record(name: &str, value: f64) {
    if TRANSACTION_HOOK
        .try_with(|hook| hook.aggregator.record_tagged(name, value, &[]))
        .is_err()
    {
        warn!("No hook available; sample for `{name}` not recorded.");
    }
}

pub fn record_sample(sample: MetricSample) {
    if TRANSACTION_HOOK
        .try_with(|hook| hook.aggregator.record(&sample))
        .is_err()
    {
        warn!("No hook available; sample for `{}` not recorded.", sample.name);
    }
}

/// Id of the virtual user running the current task, if any.
pub fn unit_id() -> Option<u64> {
    TRANSACTION_HOOK.try_with(|hook| hook.unit).ok()
}

#[derive(Clone)]
pub(crate) struct TransactionData {
    pub aggregator: Arc<Aggregator>,
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
    pub unit: u64,
}

tokio::task_local! {
    pub(crate) static TRANSACTION_HOOK: TransactionData;
}
