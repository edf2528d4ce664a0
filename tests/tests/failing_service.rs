mod utils;
use utils::*;

use demos::{stress, user, Target};
use mock_service::{MockConfig, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use volley::core::THRESHOLDS_FAILED_EXIT_CODE;
use volley::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn always_500_fails_the_run() {
    init();
    let addr = mock(MockConfig::failing(StatusCode::INTERNAL_SERVER_ERROR));
    let target = Arc::new(Target::new(base_url(addr)));

    let report = user::scenario(target)
        .stage(Duration::ZERO, 3)
        .stage(Duration::from_secs(3), 3)
        .threshold("http_req_duration", "p(95)<200")
        .threshold("http_req_failed", "rate<0.1")
        .await
        .unwrap();

    assert!(!report.passed(), "{report}");
    assert_eq!(report.exit_code(), THRESHOLDS_FAILED_EXIT_CODE);
    let failed: Vec<_> = report.failed_thresholds().map(|t| t.metric.as_str()).collect();
    assert_eq!(failed, vec!["http_req_failed"]);

    let created = report.snapshot.check("POST status is 200 or 201").unwrap();
    assert_eq!(created.passes, 0);
    assert!(created.fails > 0);
    assert!(report.aborted_by.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn abort_on_fail_cuts_the_run_short() {
    init();
    let addr = mock(MockConfig::failing(StatusCode::SERVICE_UNAVAILABLE));
    let target = Arc::new(Target::new(base_url(addr)));

    let report = stress::scenario(target)
        .stage(Duration::ZERO, 3)
        .stage(Duration::from_secs(60), 3)
        .threshold_abort("http_req_failed", "rate<0.1")
        .threshold_interval(Duration::from_millis(500))
        .await
        .unwrap();

    assert_eq!(report.aborted_by.as_deref(), Some("http_req_failed rate<0.1"));
    assert!(report.elapsed < Duration::from_secs(10), "{:?}", report.elapsed);
    assert_eq!(report.exit_code(), THRESHOLDS_FAILED_EXIT_CODE);
}
