//! Create a user, read it back, and verify the echo.
use crate::cli::Defaults;
use crate::http::{observed, send, Observed, Reply, RequestError};
use crate::{millis, request_id, verdict, Iteration, Target};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use volley::prelude::*;
use volley::Scenario;

pub const DEFAULTS: Defaults = Defaults {
    base_url: "http://d2sp6px9zdnap5.cloudfront.net",
    stages: &[
        "0s:100", "5m:100", "0s:200", "5m:200", "0s:100", "5m:100", "0s:100", "5m:100",
        "0s:1000", "5m:1000", "0s:100", "5m:100",
    ],
    thresholds: &[
        ("http_req_duration", "p(95)<200"),
        ("http_req_failed", "rate<0.1"),
    ],
};

/// Responses at or above this are reported as `SLOW`.
pub const SLOW: Duration = Duration::from_millis(200);
const BETWEEN_REQUESTS: Duration = Duration::from_millis(200);
const PACING: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub requestid: String,
    pub uuid: String,
    pub username: String,
    pub email: String,
    pub status_message: String,
}

impl NewUser {
    pub fn random() -> Self {
        let requestid = request_id().to_string();
        let username = format!("user_{requestid}");
        Self {
            email: format!("{username}@example.org"),
            uuid: uuid::Uuid::new_v4().to_string(),
            status_message: "I'm happy".to_string(),
            username,
            requestid,
        }
    }
}

#[transaction("create_user")]
pub async fn create_user(target: &Target, user: &NewUser) -> Result<Reply, RequestError> {
    send(target.client.post(target.url("/v1/user")).json(user)).await
}

#[transaction("get_user")]
pub async fn get_user(target: &Target, user: &NewUser) -> Result<Reply, RequestError> {
    let query = [
        ("email", user.email.as_str()),
        ("requestid", user.requestid.as_str()),
        ("uuid", user.uuid.as_str()),
    ];
    send(target.client.get(target.url("/v1/user")).query(&query)).await
}

pub async fn iteration(target: &Target) -> Duration {
    let user = NewUser::random();

    let post = create_user(target, &user).await;
    let Observed {
        status,
        body,
        elapsed,
    } = observed(&post);
    let post_ok = matches!(status, Some(200 | 201));
    check("POST status is 200 or 201", post_ok);
    check("POST response time < 200ms (SUCCESS)", elapsed < SLOW);
    check("POST response time >= 200ms (SLOW)", elapsed >= SLOW);
    check("POST response has correct structure", body.is_object());
    let (post_result, speed) = verdict(post_ok, elapsed, SLOW);
    info!(
        "POST: {} | Status: {} | Time: {:.2}ms | Result: {post_result} ({speed})",
        user.requestid,
        status.unwrap_or_default(),
        millis(elapsed),
    );

    tokio::time::sleep(BETWEEN_REQUESTS).await;

    let get = get_user(target, &user).await;
    let Observed {
        status,
        body,
        elapsed,
    } = observed(&get);
    let get_ok = status == Some(200);
    check("GET status is 200", get_ok);
    check("GET response time < 200ms (SUCCESS)", elapsed < SLOW);
    check("GET response time >= 200ms (SLOW)", elapsed >= SLOW);
    check(
        "GET response contains created user data",
        body["email"] == user.email.as_str() && body["requestid"] == user.requestid.as_str(),
    );
    let (get_result, speed) = verdict(get_ok, elapsed, SLOW);
    info!(
        "GET: {} | Status: {} | Time: {:.2}ms | Result: {get_result} ({speed})",
        user.requestid,
        status.unwrap_or_default(),
        millis(elapsed),
    );

    info!(
        "SUMMARY: {} | POST: {post_result} | GET: {get_result}",
        user.requestid
    );
    PACING
}

pub fn scenario(
    target: Arc<Target>,
) -> Scenario<impl Fn() -> Iteration + Clone + Send + Sync + 'static> {
    Scenario::new("user", move || -> Iteration {
        let target = target.clone();
        Box::pin(async move { iteration(&target).await })
    })
}
