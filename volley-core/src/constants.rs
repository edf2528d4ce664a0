use std::time::Duration;

/// Default interval at which the pool is reconciled against the stage schedule.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Default time units are given to finish their current iteration once the run drains.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// Threshold evaluation interval used when an `abort_on_fail` threshold is configured
/// without an explicit interval.
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(2);

/// Default upper bound on distinct metric names (submetrics included).
pub const DEFAULT_MAX_METRICS: usize = 1_000;

/// Trend metrics keep every sample (and report exact percentiles) up to this many values.
/// Past it percentiles come from a log-bucketed histogram.
pub const EXACT_PERCENTILE_LIMIT: usize = 65_536;

/// Process exit status when at least one threshold failed.
pub const THRESHOLDS_FAILED_EXIT_CODE: u8 = 99;

/// Process exit status when the run configuration is rejected.
pub const CONFIG_ERROR_EXIT_CODE: u8 = 104;
