use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, Interval};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Fixed-period wakeups for the run loop, with an optional earlier deadline.
pub(crate) struct Timer {
    interval: Interval,
    last_tick: Instant,
    interval_dur: Duration,
}

impl Timer {
    pub async fn new(interval_dur: Duration) -> Self {
        let mut interval = interval(interval_dur);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // NOTE: First tick completes instantly
        let last_tick = interval.tick().await;
        Self {
            interval,
            last_tick,
            interval_dur,
        }
    }

    /// Wait for the next tick, or for `deadline` if it comes first. Returns the time since
    /// the previous wakeup.
    pub async fn tick_until(&mut self, deadline: Option<Instant>) -> Duration {
        let next = match deadline {
            Some(deadline) => tokio::select! {
                next = self.interval.tick() => next,
                _ = sleep_until(deadline) => deadline,
            },
            None => self.interval.tick().await,
        };
        let elapsed = self.last_tick.elapsed();
        self.last_tick = next;
        elapsed
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.interval_dur))
    }
}
