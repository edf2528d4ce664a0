mod utils;
use utils::*;

use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;
use volley::prelude::*;

static BASE_URL: OnceLock<String> = OnceLock::new();
static CLIENT: OnceLock<Client> = OnceLock::new();

// Single test in this binary: the shared client must stay on one runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn attribute_macros_drive_a_run() {
    init();
    BASE_URL.get_or_init(|| base_url(mock(Default::default())));

    let report = delay_scenario()
        .stages(["0s:5", "2s:5"].map(|s| s.parse::<Stage>().unwrap()))
        .threshold("http_req_failed", "rate<0.1")
        .threshold("http_req_duration{name:delay_10ms}", "p(50)>=10")
        .threshold("checks", "rate>0.99")
        .await
        .unwrap();
    assert!(report.passed(), "{report}");
    assert!(report.metric("delay_10ms_duration").is_some());
    assert!(report.metric("payload_bytes").is_some());

    let report = status_scenario()
        .stage(Duration::ZERO, 2)
        .stage(Duration::from_secs(1), 2)
        .threshold("http_req_failed", "rate<0.1")
        .await
        .unwrap();
    assert!(!report.passed());
    assert_eq!(report.failed_iterations, report.iterations);
    assert!(report.iterations > 0);
}

#[scenario]
async fn delay_scenario() -> Duration {
    let ok = delay_10ms().await.is_ok();
    check("delay answered", ok);
    record_sample(MetricSample::new("payload_bytes", 0.));
    Duration::from_millis(100)
}

#[transaction("delay_10ms")]
async fn delay_10ms() -> Result<(), reqwest::Error> {
    let client = CLIENT.get_or_init(Client::new);
    let url = format!("{}/delay/ms/10", BASE_URL.get().map_or("", String::as_str));
    client.get(url).send().await?.error_for_status()?;
    Ok(())
}

#[scenario]
async fn status_scenario() -> Result<Duration, reqwest::Error> {
    status_500().await?;
    Ok(Duration::from_millis(100))
}

#[transaction]
async fn status_500() -> Result<(), reqwest::Error> {
    let client = CLIENT.get_or_init(Client::new);
    let url = format!("{}/status/500", BASE_URL.get().map_or("", String::as_str));
    client.get(url).send().await?.error_for_status()?;
    Ok(())
}
