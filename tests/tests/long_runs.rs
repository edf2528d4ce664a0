mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;
    use demos::{cli::Defaults, stress, user, Target};
    use mock_service::MockConfig;
    use std::sync::Arc;
    use std::time::Duration;
    use volley::prelude::*;

    fn thresholds<S: ConfigurableScenario<T>, T: Send>(mut s: S, defaults: &Defaults) -> S {
        for (metric, expr) in defaults.thresholds {
            s = s.threshold(metric, expr);
        }
        s
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn steady_ten_users_for_five_minutes() {
        init();
        let addr = mock(MockConfig::with_latency(Duration::from_millis(20)));
        let target = Arc::new(Target::new(base_url(addr)));

        let scenario = user::scenario(target)
            .stage(Duration::ZERO, 10)
            .stage(Duration::from_secs(300), 10);
        let report = thresholds(scenario, &user::DEFAULTS).await.unwrap();

        assert!(report.passed(), "{report}");
        assert_eq!(report.peak_units, 10);
        // 10 users, ~1.25s per iteration.
        assert!(report.iterations > 2_000, "{}", report.iterations);
        assert!(report.elapsed >= Duration::from_secs(300));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stress_ramp_up_and_down() {
        init();
        let addr = mock(MockConfig::with_latency(Duration::from_millis(50)));
        let target = Arc::new(Target::new(base_url(addr)));

        let scenario = stress::scenario(target)
            .stage(Duration::from_secs(60), 200)
            .stage(Duration::from_secs(60), 200)
            .stage(Duration::from_secs(60), 0);
        let report = thresholds(scenario, &stress::DEFAULTS).await.unwrap();

        assert!(report.passed(), "{report}");
        assert_eq!(report.peak_units, 200);
        assert_eq!(report.timeline.last().map(|s| s.active), Some(0));
    }
}
