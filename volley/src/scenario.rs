//! Scenario handle and its configuration methods
use crate::controller::RunController;
use crate::outcome::IterationOutcome;
use std::{
    future::Future,
    num::NonZeroU32,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};
use volley_core::{ConfigError, MetricKind, RampMode, RunReport, ScenarioConfig, Stage};

type RunnerFuture = Pin<Box<dyn Future<Output = Result<RunReport, ConfigError>> + Send>>;

/// Load test scenario structure
///
/// Handler for running scenarios. Usually created with the [`#[scenario]`](volley_macros::scenario)
/// macro, which adds these methods to functions. Awaiting it validates the configuration
/// and drives the run to completion.
#[pin_project::pin_project]
pub struct Scenario<T> {
    func: T,
    runner_fut: Option<RunnerFuture>,
    config: ScenarioConfig,
}

impl<T> Scenario<T> {
    pub fn new(name: &str, func: T) -> Self {
        Self {
            func,
            runner_fut: None,
            config: ScenarioConfig::new(name),
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }
}

impl<T, F, O> Scenario<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = O> + Send + 'static,
    O: IterationOutcome + 'static,
{
    /// Validate the configuration and hand back the controller without starting it, e.g. to
    /// [`subscribe`](RunController::subscribe) to state changes first.
    pub fn controller(self) -> Result<RunController<T>, ConfigError> {
        RunController::new(&self.config, self.func)
    }
}

impl<T, F, O> Future for Scenario<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = O> + Send + 'static,
    O: IterationOutcome + 'static,
{
    type Output = Result<RunReport, ConfigError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let runner = this.runner_fut.get_or_insert_with(|| {
            let func = this.func.clone();
            let config = this.config.clone();
            Box::pin(async move {
                let controller = RunController::new(&config, func).map_err(|err| {
                    error!("Invalid configuration for {}: {err}", config.name);
                    err
                })?;
                Ok(controller.run().await)
            })
        });
        runner.as_mut().poll(cx)
    }
}

pub trait ConfigurableScenario<T: Send>: Future<Output = T> + Sized + Send {
    fn stage(self, duration: Duration, target: usize) -> Self;
    fn stages(self, stages: impl IntoIterator<Item = Stage>) -> Self;
    fn ramp(self, ramp: RampMode) -> Self;
    fn threshold(self, metric: &str, expression: &str) -> Self;
    fn threshold_abort(self, metric: &str, expression: &str) -> Self;
    fn tick(self, tick: Duration) -> Self;
    fn grace(self, grace: Duration) -> Self;
    fn threshold_interval(self, interval: Duration) -> Self;
    fn max_rps(self, rps: NonZeroU32) -> Self;
    fn declare_metric(self, name: &str, kind: MetricKind) -> Self;
    fn max_metrics(self, limit: usize) -> Self;
}

impl<T, F, O> ConfigurableScenario<Result<RunReport, ConfigError>> for Scenario<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = O> + Send + 'static,
    O: IterationOutcome + 'static,
{
    /// Append a stage: move to `target` units over `duration`.
    ///
    /// A zero `duration` jumps straight to `target`.
    ///
    /// # Example
    /// ```no_run
    /// use volley::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let report = my_scenario()
    ///         .stage(Duration::ZERO, 10)
    ///         .stage(Duration::from_secs(300), 10)
    ///         .stage(Duration::ZERO, 0)
    ///         .threshold("http_req_duration", "p(95)<200")
    ///         .await
    ///         .unwrap();
    ///     println!("{report}");
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario() {
    /// }
    /// ```
    fn stage(mut self, duration: Duration, target: usize) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    /// Append several stages, e.g. parsed from `"5m:100"` strings.
    fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.config.stages.extend(stages);
        self
    }

    /// How desired concurrency moves within a stage. Defaults to [`RampMode::Linear`].
    fn ramp(mut self, ramp: RampMode) -> Self {
        self.config.ramp = ramp;
        self
    }

    /// Add a pass/fail criterion, evaluated at the end of the run.
    ///
    /// `metric` is a metric name or a submetric such as `http_req_duration{name:create_user}`;
    /// `expression` is `<aggregation> <op> <number>`, for example `p(95)<200` or `rate<0.1`.
    ///
    /// # Example
    /// ```no_run
    /// use volley::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     my_scenario()
    ///         .stage(Duration::from_secs(60), 5)
    ///         .threshold("http_req_failed", "rate<0.1")
    ///         .threshold("http_req_duration{name:create_user}", "p(99)<500")
    ///         .await
    ///         .unwrap();
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario() {
    /// }
    /// ```
    fn threshold(mut self, metric: &str, expression: &str) -> Self {
        self.config
            .thresholds
            .push((metric.to_string(), expression.to_string(), false));
        self
    }

    /// Like [`threshold`](Self::threshold), but the run stops early once the threshold is
    /// seen failing during periodic evaluation.
    fn threshold_abort(mut self, metric: &str, expression: &str) -> Self {
        self.config
            .thresholds
            .push((metric.to_string(), expression.to_string(), true));
        self
    }

    /// Reconciliation period of the pool. Stage boundaries are always honoured exactly.
    fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    /// How long stopping units may take to finish their iteration before being abandoned.
    fn grace(mut self, grace: Duration) -> Self {
        self.config.grace = grace;
        self
    }

    fn threshold_interval(mut self, interval: Duration) -> Self {
        self.config.threshold_interval = Some(interval);
        self
    }

    /// Cap the request rate across all units. Applies to `#[transaction]` calls.
    fn max_rps(mut self, rps: NonZeroU32) -> Self {
        self.config.max_rps = Some(rps);
        self
    }

    fn declare_metric(mut self, name: &str, kind: MetricKind) -> Self {
        self.config.metrics.push((name.to_string(), kind));
        self
    }

    fn max_metrics(mut self, limit: usize) -> Self {
        self.config.max_metrics = limit;
        self
    }
}
