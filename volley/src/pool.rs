//! Virtual users: one tokio task per unit, each looping over the scenario until told to stop.
use crate::aggregator::Aggregator;
use crate::outcome::IterationOutcome;
use crate::transaction::{TransactionData, TRANSACTION_HOOK};
use futures_util::FutureExt;
use governor::DefaultDirectRateLimiter;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{ITERATIONS, ITERATION_CHECK, ITERATION_DURATION, ITERATION_FAILED};

/// How a pool shutdown went.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownStats {
    pub stopped: usize,
    /// Units still running at the grace deadline; their tasks were aborted.
    pub abandoned: usize,
    /// Abandoned units that were inside a scenario invocation when aborted.
    pub incomplete_iterations: usize,
}

/// A set of concurrently running virtual users.
///
/// Growing spawns new units; shrinking signals the most recently spawned units to stop
/// once their current iteration is done. Units are never aborted outside of
/// [`VirtualUserPool::shutdown`].
pub struct VirtualUserPool<T> {
    scenario: T,
    aggregator: Arc<Aggregator>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    units: Vec<UnitHandle>,
    retiring: Vec<UnitHandle>,
    next_id: u64,
    active: Arc<AtomicUsize>,
    peak: usize,
}

struct UnitHandle {
    id: u64,
    stop: watch::Sender<bool>,
    in_iteration: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl<T, F, O> VirtualUserPool<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = O> + Send + 'static,
    O: IterationOutcome + 'static,
{
    pub fn new(
        scenario: T,
        aggregator: Arc<Aggregator>,
        limiter: Option<Arc<DefaultDirectRateLimiter>>,
    ) -> Self {
        Self {
            scenario,
            aggregator,
            limiter,
            units: vec![],
            retiring: vec![],
            next_id: 0,
            active: Arc::new(AtomicUsize::new(0)),
            peak: 0,
        }
    }

    /// Spawn or retire units so that exactly `desired` are running.
    pub fn reconcile(&mut self, desired: usize) {
        self.reap();

        let running = self.units.len();
        if desired > running {
            debug!("Spawning {} units ({running} -> {desired})", desired - running);
            for _ in running..desired {
                self.spawn_unit();
            }
        } else if desired < running {
            debug!("Retiring {} units ({running} -> {desired})", running - desired);
            for unit in self.units.drain(desired..).rev() {
                unit.stop.send_replace(true);
                self.retiring.push(unit);
            }
        }

        self.peak = self.peak.max(self.active_count());
    }

    /// Stop every unit, waiting up to `grace` for in-flight iterations to finish.
    pub async fn shutdown(&mut self, grace: Duration) -> ShutdownStats {
        self.reconcile(0);

        let deadline = Instant::now() + grace;
        let mut stats = ShutdownStats::default();
        for mut unit in std::mem::take(&mut self.retiring) {
            if timeout_at(deadline, &mut unit.handle).await.is_ok() {
                stats.stopped += 1;
                continue;
            }

            if unit.in_iteration.load(Ordering::Acquire) {
                stats.incomplete_iterations += 1;
            }
            unit.handle.abort();
            stats.abandoned += 1;
            warn!(
                "Unit {} did not stop within {}; abandoning it",
                unit.id,
                humantime::format_duration(grace)
            );
        }
        stats
    }
}

impl<T> VirtualUserPool<T> {
    /// Units whose task is still alive, including those told to stop.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Units not yet told to stop.
    pub fn running_count(&self) -> usize {
        self.units.len()
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    fn reap(&mut self) {
        self.retiring.retain(|unit| !unit.handle.is_finished());
        self.units.retain(|unit| {
            let finished = unit.handle.is_finished();
            if finished {
                error!("Unit {} exited without being stopped", unit.id);
            }
            !finished
        });
    }
}

impl<T, F, O> VirtualUserPool<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = O> + Send + 'static,
    O: IterationOutcome + 'static,
{
    fn spawn_unit(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let (stop, stop_rx) = watch::channel(false);
        let in_iteration = Arc::new(AtomicBool::new(false));
        let guard = ActiveGuard::new(self.active.clone());

        let data = TransactionData {
            aggregator: self.aggregator.clone(),
            limiter: self.limiter.clone(),
            unit: id,
        };
        let unit = Unit {
            id,
            stop: stop_rx,
            in_iteration: in_iteration.clone(),
            aggregator: self.aggregator.clone(),
            _guard: guard,
        };
        let handle = tokio::spawn(TRANSACTION_HOOK.scope(data, unit.run(self.scenario.clone())));

        self.units.push(UnitHandle {
            id,
            stop,
            in_iteration,
            handle,
        });
    }
}

impl<T> Drop for VirtualUserPool<T> {
    fn drop(&mut self) {
        for unit in self.units.iter().chain(&self.retiring) {
            unit.handle.abort();
        }
    }
}

struct Unit {
    id: u64,
    stop: watch::Receiver<bool>,
    in_iteration: Arc<AtomicBool>,
    aggregator: Arc<Aggregator>,
    _guard: ActiveGuard,
}

impl Unit {
    async fn run<T, F, O>(mut self, scenario: T)
    where
        T: Fn() -> F,
        F: Future<Output = O> + 'static,
        O: IterationOutcome + 'static,
    {
        trace!("Unit {} started", self.id);
        let mut iterations = 0u64;
        loop {
            if *self.stop.borrow() {
                break;
            }

            self.in_iteration.store(true, Ordering::Release);
            let start = Instant::now();
            let result = AssertUnwindSafe(scenario()).catch_unwind().await;
            let think = self.record_iteration(start.elapsed(), result);
            self.in_iteration.store(false, Ordering::Release);
            iterations += 1;

            if *self.stop.borrow() {
                break;
            }

            if think.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(think) => {}
                    _ = self.stop.wait_for(|stop| *stop) => break,
                }
            }
        }
        trace!("Unit {} stopped after {iterations} iterations", self.id);
    }

    fn record_iteration<O: IterationOutcome>(
        &self,
        elapsed: Duration,
        result: Result<O, Box<dyn Any + Send>>,
    ) -> Duration {
        let outcome = match result {
            Ok(output) => output.into_outcome(),
            Err(panic) => {
                let message = panic_message(&panic);
                warn!("Scenario panicked in unit {}: {message}", self.id);
                Err(message)
            }
        };

        let agg = &self.aggregator;
        agg.record_tagged(ITERATION_DURATION, elapsed.as_secs_f64() * 1_000., &[]);
        agg.record_tagged(ITERATIONS, 1., &[]);
        agg.record_tagged(ITERATION_FAILED, if outcome.is_err() { 1. } else { 0. }, &[]);
        agg.check(ITERATION_CHECK, outcome.is_ok());

        match outcome {
            Ok(think) => think,
            Err(err) => {
                trace!("Iteration failed in unit {}: {err}", self.id);
                Duration::ZERO
            }
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Counts a unit as active for as long as its task exists, aborted or not.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        #[cfg(feature = "metrics")]
        metrics::gauge!("volley_active_units").increment(1.);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        #[cfg(feature = "metrics")]
        metrics::gauge!("volley_active_units").decrement(1.);
    }
}
