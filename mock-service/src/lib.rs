//! In-process stand-in for the user and stress APIs, plus a few knobs for shaping latency
//! and failures in tests.
pub use axum::http::StatusCode;
use axum::{
    debug_handler,
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Largest `length` `/v1/stress` will echo back.
pub const MAX_STRESS_LENGTH: usize = 64 * 1024;

/// Behaviour of the `/v1` endpoints.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Mean handler latency. Actual latency is normally distributed around it (10% std-dev).
    pub latency: Duration,
    /// Answer every `/v1` request with this status instead of handling it.
    pub force_status: Option<StatusCode>,
    /// Requests above this rate are rejected with `429`.
    pub max_rps: Option<NonZeroU32>,
}

impl MockConfig {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn failing(status: StatusCode) -> Self {
        Self {
            force_status: Some(status),
            ..Self::default()
        }
    }
}

struct AppState {
    config: MockConfig,
    limiter: Option<DefaultDirectRateLimiter>,
    users: RwLock<HashMap<String, User>>,
}

type SharedState = Arc<AppState>;

pub fn router(config: MockConfig) -> Router {
    let limiter = config
        .max_rps
        .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
    let state = Arc::new(AppState {
        config,
        limiter,
        users: RwLock::new(HashMap::new()),
    });

    Router::new()
        .route("/v1/user", post(create_user).get(get_user))
        .route("/v1/stress", post(stress))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/status/:code", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(addr: SocketAddr, config: MockConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// Serve on an ephemeral localhost port in the background and return its address.
pub async fn spawn(config: MockConfig) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(config);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!("Mock service stopped: {err}");
        }
    });
    Ok(addr)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub requestid: String,
    pub uuid: String,
    pub username: String,
    pub email: String,
    pub status_message: String,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub email: String,
    pub requestid: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressRequest {
    pub requestid: String,
    pub uuid: String,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressResponse {
    pub requestid: String,
    pub uuid: String,
    pub data: String,
}

/// Shared preamble of the `/v1` handlers: count, rate limit, forced status and latency.
async fn admit(state: &AppState) -> Result<(), StatusCode> {
    counter!("mock_service.requests").increment(1);
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);

    if let Some(status) = state.config.force_status {
        return Err(status);
    }
    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            debug!("Rate limited");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }
    if !state.config.latency.is_zero() {
        tokio::time::sleep(jitter(state.config.latency)).await;
    }
    Ok(())
}

#[debug_handler]
async fn create_user(
    State(state): State<SharedState>,
    Json(user): Json<User>,
) -> Result<(StatusCode, Json<User>), StatusCode> {
    admit(&state).await?;
    if user.email.is_empty() || user.requestid.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let mut users = state
        .users
        .write()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    users.insert(user.email.clone(), user.clone());
    gauge!("mock_service.users").set(users.len() as f64);
    Ok((StatusCode::CREATED, Json(user)))
}

#[debug_handler]
async fn get_user(
    State(state): State<SharedState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<User>, StatusCode> {
    admit(&state).await?;

    let users = state
        .users
        .read()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let user = users.get(&query.email).ok_or(StatusCode::NOT_FOUND)?;

    let matches = |expected: &Option<String>, actual: &str| {
        expected.as_deref().map_or(true, |e| e == actual)
    };
    if matches(&query.requestid, &user.requestid) && matches(&query.uuid, &user.uuid) {
        Ok(Json(user.clone()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

#[debug_handler]
async fn stress(
    State(state): State<SharedState>,
    Json(req): Json<StressRequest>,
) -> Result<Json<StressResponse>, StatusCode> {
    if req.length > MAX_STRESS_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    admit(&state).await?;
    histogram!("mock_service.stress_length").record(req.length as f64);
    Ok(Json(StressResponse {
        data: "x".repeat(req.length),
        requestid: req.requestid,
        uuid: req.uuid,
    }))
}

#[debug_handler]
async fn delay(Path(delay_ms): Path<u64>) {
    counter!("mock_service.requests").increment(1);
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[debug_handler]
async fn status(Path(code): Path<u16>) -> StatusCode {
    counter!("mock_service.requests").increment(1);
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/** Utils **/

fn jitter(mean: Duration) -> Duration {
    let mean_ms = mean.as_secs_f64() * 1_000.;
    match Normal::new(mean_ms, mean_ms / 10.) {
        Ok(normal) => {
            let v: f64 = normal.sample(&mut rand::thread_rng());
            Duration::from_secs_f64(v.max(0.) / 1_000.)
        }
        Err(_) => mean,
    }
}

/** TPS Printer **/

static TPS_MEASURE: AtomicU64 = AtomicU64::new(0);

pub async fn tps_measure_task() {
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let transactions = TPS_MEASURE.swap(0, Ordering::Relaxed);
        info!("{transactions} TPS");
    }
}
