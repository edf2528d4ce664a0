mod utils;
use utils::*;

use demos::{user, Target};
use mock_service::MockConfig;
use std::sync::Arc;
use std::time::Duration;
use volley::core::{MetricValue, HTTP_REQS};
use volley::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn user_flow_against_healthy_service() {
    init();
    let addr = mock(MockConfig::with_latency(Duration::from_millis(20)));
    let target = Arc::new(Target::new(base_url(addr)));

    let report = user::scenario(target)
        .stage(Duration::ZERO, 4)
        .stage(Duration::from_secs(4), 4)
        .threshold("http_req_duration", "p(95)<200")
        .threshold("http_req_failed", "rate<0.1")
        .threshold("http_req_duration{name:create_user}", "p(95)<200")
        .threshold("checks{check:GET status is 200}", "rate==1")
        .threshold("create_user_duration", "p(95)<200")
        .grace(Duration::from_secs(5))
        .await
        .unwrap();

    assert!(report.passed(), "{report}");
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.peak_units, 4);
    assert_eq!(report.abandoned_units, 0);
    assert!(report.iterations >= 8, "{}", report.iterations);
    assert_eq!(report.failed_iterations, 0);

    // Two requests per iteration.
    let reqs = report.metric(HTTP_REQS).map_or(0., MetricValue::count) as u64;
    assert_eq!(reqs, report.iterations * 2);

    let echo = report
        .snapshot
        .check("GET response contains created user data")
        .unwrap();
    assert_eq!(echo.fails, 0);
    assert_eq!(echo.passes, report.iterations);

    let created = report.snapshot.check("POST status is 200 or 201").unwrap();
    assert_eq!(created.pass_rate(), 1.);
    let slow = report.snapshot.check("POST response time >= 200ms (SLOW)").unwrap();
    assert_eq!(slow.passes, 0);

    assert!(report.metric("create_user_duration").is_some());
    assert!(report.metric("get_user_duration").is_some());
}
