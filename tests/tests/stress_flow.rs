mod utils;
use utils::*;

use demos::{stress, Target};
use mock_service::MockConfig;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use volley::core::{MetricValue, HTTP_REQS};
use volley::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn stress_flow_with_rate_cap() {
    init();
    let addr = mock(MockConfig::with_latency(Duration::from_millis(5)));
    let target = Arc::new(Target::new(base_url(addr)));

    let report = stress::scenario(target)
        .stage(Duration::ZERO, 6)
        .stage(Duration::from_secs(3), 6)
        .threshold("http_req_duration", "p(95)<1000")
        .threshold("http_req_failed", "rate<0.1")
        .max_rps(NonZeroU32::new(4).unwrap())
        .await
        .unwrap();

    assert!(report.passed(), "{report}");
    let structure = report
        .snapshot
        .check("POST response has correct structure")
        .unwrap();
    assert_eq!(structure.fails, 0);

    // Burst of 4, then 4 per second for the whole run including the drain.
    let reqs = report.metric(HTTP_REQS).map_or(0., MetricValue::count);
    let allowed = 4. + 4. * report.elapsed.as_secs_f64();
    assert!(reqs > 0. && reqs <= allowed + 1., "{reqs} > {allowed}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn rate_limit_wait_is_not_timed_as_slow() {
    init();
    let addr = mock(MockConfig::with_latency(Duration::from_millis(5)));
    let target = Arc::new(Target::new(base_url(addr)));

    // Eight units behind one request per second queue for several seconds each.
    let report = stress::scenario(target)
        .stage(Duration::ZERO, 8)
        .stage(Duration::from_secs(3), 8)
        .threshold("http_req_duration", "p(95)<1000")
        .max_rps(NonZeroU32::new(1).unwrap())
        .await
        .unwrap();

    assert!(report.passed(), "{report}");
    let fast = report
        .snapshot
        .check("POST response time < 1000ms (SUCCESS)")
        .unwrap();
    let slow = report
        .snapshot
        .check("POST response time >= 1000ms (SLOW)")
        .unwrap();
    assert!(fast.passes > 0);
    assert_eq!(fast.fails, 0, "{report}");
    assert_eq!(slow.passes, 0, "{report}");
}
