//! Fixed-size payloads against the stress endpoint with randomised pacing.
use crate::cli::Defaults;
use crate::http::{observed, send, Observed, Reply, RequestError};
use crate::{millis, request_id, verdict, Iteration, Target};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use volley::prelude::*;
use volley::Scenario;

pub const DEFAULTS: Defaults = Defaults {
    base_url: "http://dv7x7l3k87prk.cloudfront.net",
    stages: &[
        "0s:30", "5m:30", "0s:70", "5m:70", "0s:500", "5m:500", "0s:100", "5m:100", "0s:10",
        "5m:10", "0s:2", "5m:2",
    ],
    thresholds: &[
        ("http_req_duration", "p(95)<1000"),
        ("http_req_failed", "rate<0.1"),
    ],
};

pub const SLOW: Duration = Duration::from_millis(1000);
pub const PAYLOAD_LENGTH: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct StressPayload {
    pub requestid: String,
    pub uuid: String,
    pub length: usize,
}

impl StressPayload {
    pub fn random() -> Self {
        Self {
            requestid: request_id().to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
            length: PAYLOAD_LENGTH,
        }
    }
}

#[transaction("stress")]
pub async fn post_stress(target: &Target, payload: &StressPayload) -> Result<Reply, RequestError> {
    send(target.client.post(target.url("/v1/stress")).json(payload)).await
}

/// Uniform in `[0.5s, 1.5s)`.
pub fn pacing() -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.5..1.5))
}

pub async fn iteration(target: &Target) -> Duration {
    let payload = StressPayload::random();

    let res = post_stress(target, &payload).await;
    let Observed {
        status,
        body,
        elapsed,
    } = observed(&res);
    let ok = matches!(status, Some(200 | 201));
    check("POST status is 200 or 201", ok);
    check("POST response time < 1000ms (SUCCESS)", elapsed < SLOW);
    check("POST response time >= 1000ms (SLOW)", elapsed >= SLOW);
    check("POST response has correct structure", body.is_object());

    let (result, speed) = verdict(ok, elapsed, SLOW);
    info!(
        "STRESS POST: {} | Status: {} | Time: {:.2}ms | Result: {result} ({speed})",
        payload.requestid,
        status.unwrap_or_default(),
        millis(elapsed),
    );
    pacing()
}

pub fn scenario(
    target: Arc<Target>,
) -> Scenario<impl Fn() -> Iteration + Clone + Send + Sync + 'static> {
    Scenario::new("stress", move || -> Iteration {
        let target = target.clone();
        Box::pin(async move { iteration(&target).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_bounds() {
        for _ in 0..1_000 {
            let p = pacing();
            assert!(p >= Duration::from_millis(500) && p < Duration::from_millis(1500));
        }
    }

    #[test]
    fn payload_shape() {
        let json = serde_json::to_value(StressPayload::random()).unwrap();
        assert_eq!(json["length"], 256);
        assert_eq!(json["requestid"].as_str().unwrap().len(), 13);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn iteration_logs_the_stress_line() {
        let addr = mock_service::spawn(Default::default()).await.unwrap();
        let target = Target::new(format!("http://{addr}"));

        let think = iteration(&target).await;
        assert!(think >= Duration::from_millis(500));
        assert!(logs_contain("STRESS POST:"));
        assert!(logs_contain("| Status: 200 |"));
        assert!(logs_contain("Result: SUCCESS (FAST)"));
    }
}
