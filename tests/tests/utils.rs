use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::MockConfig;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        let _ = FmtSubscriber::builder()
            .with_env_filter("volley=debug,demos=info,mock_service=info,axum::rejection=trace")
            .try_init();

        // Exercise the `metrics` facade without binding a port.
        let _ = PrometheusBuilder::new().install_recorder();
    });
}

/// Serve the mock on its own thread and runtime so it outlives the calling test's runtime.
#[allow(unused)]
pub fn mock(config: MockConfig) -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let addr = mock_service::spawn(config).await.unwrap();
            tx.send(addr).unwrap();
            std::future::pending::<()>().await;
        });
    });
    rx.recv().unwrap()
}

#[allow(unused)]
pub fn base_url(addr: SocketAddr) -> String {
    format!("http://{addr}")
}
