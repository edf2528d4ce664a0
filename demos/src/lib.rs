//! Scenario layer for the user and stress APIs: request payloads, checks, per-request log
//! lines and the command line shared by the demo binaries.
pub mod cli;
pub mod http;
pub mod stress;
pub mod user;

use rand::Rng;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// One scenario invocation; resolves to the think time before the next one.
pub type Iteration = Pin<Box<dyn Future<Output = Duration> + Send>>;

/// Where and how scenarios send their requests. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Target {
    pub base_url: String,
    pub client: Client,
}

impl Target {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// 13-digit random request id.
pub fn request_id() -> u64 {
    rand::thread_rng().gen_range(1_000_000_000_000..10_000_000_000_000)
}

/// `FAST`/`SLOW` and `SUCCESS`/`FAIL` labels used in the per-request log lines.
pub(crate) fn verdict(
    status_ok: bool,
    elapsed: Duration,
    slow: Duration,
) -> (&'static str, &'static str) {
    let fast = elapsed < slow;
    (
        if status_ok && fast { "SUCCESS" } else { "FAIL" },
        if fast { "FAST" } else { "SLOW" },
    )
}

pub(crate) fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1_000.
}
