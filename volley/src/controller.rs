//! Run lifecycle: drive the stage clock, keep the pool on target, and produce the report.
use crate::aggregator::Aggregator;
use crate::outcome::IterationOutcome;
use crate::pool::VirtualUserPool;
use crate::timer::Timer;
use governor::{Quota, RateLimiter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};
use volley_core::{
    evaluate, ConcurrencySample, ConfigError, MetricValue, RunPlan, RunReport, ScenarioConfig,
    DEFAULT_THRESHOLD_INTERVAL, ITERATIONS, ITERATION_FAILED,
};

/// Lifecycle of a run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Completed,
}

/// Owns one run from validation to report.
///
/// Construction validates the configuration, so a controller that exists can always run.
pub struct RunController<T> {
    plan: RunPlan,
    scenario: T,
    state: watch::Sender<RunState>,
}

impl<T, F, O> RunController<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = O> + Send + 'static,
    O: IterationOutcome + 'static,
{
    pub fn new(config: &ScenarioConfig, scenario: T) -> Result<Self, ConfigError> {
        let plan = config.validate()?;
        let (state, _) = watch::channel(RunState::Idle);
        Ok(Self {
            plan,
            scenario,
            state,
        })
    }

    /// Receive every state transition of this run.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    #[instrument(name = "scenario", skip_all, fields(name = self.plan.name))]
    pub async fn run(self) -> RunReport {
        let RunController {
            plan,
            scenario,
            state,
        } = self;
        info!(
            "Running {} over {} ({} stages, peak {} units)",
            plan.name,
            humantime::format_duration(plan.schedule.total_duration()),
            plan.schedule.stages().len(),
            plan.schedule.peak(),
        );

        let aggregator = Arc::new(Aggregator::new(&plan.metrics, plan.max_metrics));
        let limiter = plan
            .max_rps
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        let mut pool = VirtualUserPool::new(scenario, aggregator.clone(), limiter);

        let eval_interval = plan.threshold_interval.or_else(|| {
            plan.thresholds
                .iter()
                .any(|t| t.abort_on_fail)
                .then_some(DEFAULT_THRESHOLD_INTERVAL)
        });

        let mut timer = Timer::new(plan.tick).await;
        let start = Instant::now();
        let mut timeline = Timeline::default();
        let mut next_eval = eval_interval.map(|interval| start + interval);
        let mut aborted_by = None;
        state.send_replace(RunState::Running);
        debug!("Reconciling every {timer}");

        loop {
            let elapsed = start.elapsed();
            if plan.schedule.is_complete(elapsed) {
                break;
            }

            let desired = plan.schedule.desired_concurrency(elapsed);
            pool.reconcile(desired);
            timeline.push(elapsed, desired, pool.active_count());
            aggregator.drain();

            if let (Some(at), Some(interval)) = (next_eval, eval_interval) {
                if Instant::now() >= at {
                    let snapshot = aggregator.snapshot(elapsed);
                    let outcomes = evaluate(&plan.thresholds, &snapshot);
                    for outcome in outcomes.iter().filter(|o| !o.passed) {
                        debug!(
                            "Threshold {} {} failing at {:?}",
                            outcome.metric, outcome.expression, outcome.observed
                        );
                    }
                    if let Some(failed) = outcomes.iter().find(|o| !o.passed && o.abort_on_fail) {
                        warn!(
                            "Threshold {} {} failed with abort_on_fail; stopping the run early",
                            failed.metric, failed.expression
                        );
                        aborted_by = Some(format!("{} {}", failed.metric, failed.expression));
                        break;
                    }
                    next_eval = Some(at + interval);
                }
            }

            let boundary = plan.schedule.next_boundary(elapsed).map(|b| start + b);
            let deadline = match (boundary, next_eval) {
                (Some(b), Some(e)) => Some(b.min(e)),
                (b, e) => b.or(e),
            };
            let since = timer.tick_until(deadline).await;
            trace!("Woke after {since:?}");
        }

        state.send_replace(RunState::Draining);
        info!("Draining {} units", pool.active_count());
        let shutdown = pool.shutdown(plan.grace).await;
        let elapsed = start.elapsed();
        timeline.push(elapsed, 0, pool.active_count());
        if shutdown.abandoned > 0 {
            warn!(
                "{} units abandoned after {}, {} iterations incomplete",
                shutdown.abandoned,
                humantime::format_duration(plan.grace),
                shutdown.incomplete_iterations
            );
        }

        let snapshot = aggregator.snapshot(elapsed);
        let thresholds = evaluate(&plan.thresholds, &snapshot);
        let iterations = snapshot.metric(ITERATIONS).map_or(0., MetricValue::count) as u64;
        let failed_iterations = match snapshot.metric(ITERATION_FAILED) {
            Some(MetricValue::Rate { hits, .. }) => *hits,
            _ => 0,
        };

        let report = RunReport {
            name: plan.name.clone(),
            snapshot,
            thresholds,
            iterations,
            failed_iterations,
            elapsed,
            peak_units: pool.peak(),
            abandoned_units: shutdown.abandoned,
            incomplete_iterations: shutdown.incomplete_iterations,
            aborted_by,
            timeline: timeline.samples,
        };

        state.send_replace(RunState::Completed);
        info!(
            "Scenario complete: {} iterations, thresholds {}",
            report.iterations,
            if report.passed() { "passed" } else { "failed" }
        );
        report
    }
}

/// Concurrency over time, one entry per change.
#[derive(Default)]
struct Timeline {
    samples: Vec<ConcurrencySample>,
}

impl Timeline {
    fn push(&mut self, elapsed: Duration, desired: usize, active: usize) {
        if let Some(last) = self.samples.last() {
            if last.desired == desired && last.active == active {
                return;
            }
        }
        self.samples.push(ConcurrencySample {
            elapsed,
            desired,
            active,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::transaction_hook;
    use volley_core::{generate_labels, Stage, CONFIG_ERROR_EXIT_CODE, HTTP_REQ_DURATION};

    fn stage(secs: u64, target: usize) -> Stage {
        Stage::new(Duration::from_secs(secs), target)
    }

    fn config(stages: Vec<Stage>) -> ScenarioConfig {
        let mut config = ScenarioConfig::new("test");
        config.stages = stages;
        config.thresholds = vec![
            (HTTP_REQ_DURATION.into(), "p(95)<200".into(), false),
            ("http_req_failed".into(), "rate<0.1".into(), false),
        ];
        config
    }

    async fn fast_user() -> Duration {
        let _: Result<(), ()> = transaction_hook(generate_labels!("fast"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await;
        crate::check("status is 200", true);
        Duration::from_secs(1)
    }

    async fn failing_user() -> Duration {
        let res: Result<(), u16> = transaction_hook(generate_labels!("failing"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(500)
        })
        .await;
        crate::check("status is 200", res.is_ok());
        Duration::from_millis(200)
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn steady_five_minutes() {
        let controller =
            RunController::new(&config(vec![stage(0, 10), stage(300, 10), stage(0, 0)]), fast_user)
                .unwrap();
        let mut states = controller.subscribe();
        let observer = tokio::spawn(async move {
            states.wait_for(|s| *s == RunState::Running).await.is_ok()
        });

        let report = controller.run().await;
        assert!(observer.await.unwrap());

        assert!(report.passed(), "{report}");
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.peak_units, 10);
        assert_eq!(report.abandoned_units, 0);
        assert!(report.elapsed >= Duration::from_secs(300));
        assert!(report.elapsed < Duration::from_secs(302));

        // ~10 units, one iteration per 1.05s each, for 300s
        assert!(report.iterations > 2_700 && report.iterations < 3_000, "{}", report.iterations);
        assert_eq!(report.failed_iterations, 0);

        let first = report.timeline.first().unwrap();
        assert_eq!((first.desired, first.active), (10, 10));
        let last = report.timeline.last().unwrap();
        assert_eq!((last.desired, last.active), (0, 0));
        assert!(report.timeline.iter().all(|s| s.desired == 10 || s.desired == 0));
        assert!(logs_contain("Scenario complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_service() {
        let controller = RunController::new(&config(vec![stage(30, 5)]), failing_user).unwrap();
        let states = controller.subscribe();
        let report = controller.run().await;

        assert_eq!(*states.borrow(), RunState::Completed);
        assert!(!report.passed());
        assert_eq!(report.exit_code(), volley_core::THRESHOLDS_FAILED_EXIT_CODE);
        let failed: Vec<_> = report.failed_thresholds().map(|t| t.metric.as_str()).collect();
        assert_eq!(failed, vec!["http_req_failed"]);
        assert_eq!(report.snapshot.check("status is 200").unwrap().passes, 0);
        assert!(report.aborted_by.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_on_fail_stops_early() {
        let mut config = config(vec![stage(600, 5)]);
        config.thresholds = vec![("http_req_failed".into(), "rate<0.1".into(), true)];
        config.threshold_interval = Some(Duration::from_secs(5));

        let report = RunController::new(&config, failing_user).unwrap().run().await;
        assert_eq!(report.aborted_by.as_deref(), Some("http_req_failed rate<0.1"));
        assert!(report.elapsed < Duration::from_secs(10), "{:?}", report.elapsed);
        assert!(!report.passed());
    }

    #[tokio::test(start_paused = true)]
    async fn ramps_follow_the_stages() {
        let controller = RunController::new(
            &config(vec![stage(0, 0), stage(10, 10), stage(10, 0)]),
            fast_user,
        )
        .unwrap();
        let report = controller.run().await;

        let desired: Vec<usize> = report.timeline.iter().map(|s| s.desired).collect();
        assert_eq!(desired.first(), Some(&0));
        let peak = desired.iter().position(|d| *d == 10).unwrap();
        assert!(desired[..=peak].windows(2).all(|w| w[0] <= w[1]));
        assert!(desired[peak..].windows(2).all(|w| w[0] >= w[1]));
        assert!(report.timeline.iter().all(|s| s.active <= 10));
        assert_eq!(report.peak_units, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_units_are_abandoned() {
        let mut config = config(vec![stage(1, 2)]);
        config.grace = Duration::from_millis(100);
        let report = RunController::new(&config, || async {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        })
        .unwrap()
        .run()
        .await;

        assert_eq!(report.abandoned_units, 2);
        assert_eq!(report.incomplete_iterations, 2);
        assert!(report.is_incomplete());
        assert_eq!(report.iterations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn trend_samples_are_folded_every_tick() {
        use crate::transaction::TRANSACTION_HOOK;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let most_buffered = Arc::new(AtomicUsize::new(0));
        let observed = most_buffered.clone();
        let scenario = move || {
            let observed = observed.clone();
            async move {
                let buffered = TRANSACTION_HOOK.with(|hook| hook.aggregator.buffered());
                observed.fetch_max(buffered, Ordering::Relaxed);
                Duration::from_millis(10)
            }
        };

        let report = RunController::new(&config(vec![stage(0, 10), stage(20, 10)]), scenario)
            .unwrap()
            .run()
            .await;

        // ~100 iterations per 100ms tick; unbounded growth would reach ~20k.
        assert!(report.iterations > 15_000, "{}", report.iterations);
        let most = most_buffered.load(Ordering::Relaxed);
        assert!(most < 1_000, "{most} samples buffered");
    }

    #[test]
    fn invalid_config_never_runs() {
        let err = RunController::new(&config(vec![]), fast_user).err().unwrap();
        assert_eq!(err, ConfigError::EmptyStages);
        assert_eq!(CONFIG_ERROR_EXIT_CODE, 104);
    }
}
