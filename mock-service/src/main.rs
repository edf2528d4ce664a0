use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::{run, tps_measure_task, MockConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    PrometheusBuilder::new()
        .install()
        .context("installing the prometheus exporter")?;

    let port: u16 = std::env::var("PORT")
        .ok()
        .map(|p| p.parse())
        .transpose()
        .context("PORT must be a port number")?
        .unwrap_or(3000);
    let latency_ms: u64 = std::env::var("MOCK_LATENCY_MS")
        .ok()
        .map(|p| p.parse())
        .transpose()
        .context("MOCK_LATENCY_MS must be an integer")?
        .unwrap_or(20);

    tokio::spawn(tps_measure_task());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    run(addr, MockConfig::with_latency(Duration::from_millis(latency_ms))).await
}
