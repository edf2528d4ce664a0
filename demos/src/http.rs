use reqwest::{header, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

pub const USER_AGENT: &str = "curl/8.7.1";

static NULL: Value = Value::Null;

/// Status and decoded body of a response. The body is `Null` when it is not JSON.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
    /// Time from sending to the end of the body; excludes any rate-limit wait.
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request failed: {source}")]
    Transport {
        source: reqwest::Error,
        elapsed: Duration,
    },

    #[error("status {}", .0.status)]
    Status(Reply),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            RequestError::Status(reply) => Some(reply.status),
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            RequestError::Transport { .. } => &NULL,
            RequestError::Status(reply) => &reply.body,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            RequestError::Transport { elapsed, .. } => *elapsed,
            RequestError::Status(reply) => reply.elapsed,
        }
    }
}

/// Send with the scripted user agent; any 4xx/5xx becomes [`RequestError::Status`].
///
/// Called inside a `#[transaction]`, the measured time covers the same span as
/// `http_req_duration`.
pub async fn send(request: RequestBuilder) -> Result<Reply, RequestError> {
    let start = Instant::now();
    let exchanged = exchange(request.header(header::USER_AGENT, USER_AGENT)).await;
    let elapsed = start.elapsed();

    match exchanged {
        Ok((status, body)) if status < 400 => Ok(Reply {
            status,
            body,
            elapsed,
        }),
        Ok((status, body)) => Err(RequestError::Status(Reply {
            status,
            body,
            elapsed,
        })),
        Err(source) => Err(RequestError::Transport { source, elapsed }),
    }
}

async fn exchange(request: RequestBuilder) -> Result<(u16, Value), reqwest::Error> {
    let res: Response = request.send().await?;
    let status = res.status().as_u16();
    let bytes = res.bytes().await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

/// What the checks look at, for either outcome.
pub struct Observed<'a> {
    pub status: Option<u16>,
    pub body: &'a Value,
    pub elapsed: Duration,
}

pub fn observed(res: &Result<Reply, RequestError>) -> Observed<'_> {
    match res {
        Ok(reply) => Observed {
            status: Some(reply.status),
            body: &reply.body,
            elapsed: reply.elapsed,
        },
        Err(err) => Observed {
            status: err.status(),
            body: err.body(),
            elapsed: err.elapsed(),
        },
    }
}
