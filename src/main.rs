use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_staging::config::UploadConfig;
use upload_staging::infrastructure::gate;
use upload_staging::services::handoff::{MemoryWaitingList, PassthroughCompressor};
use upload_staging::services::upload_pipeline::UploadPipeline;
use upload_staging::services::worker::GateSweeper;
use upload_staging::{AppState, create_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_staging=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting upload staging service...");

    let config = UploadConfig::from_env();
    info!(
        "📦 Temp dir={}, Image max={}MB, Body max={}MB, Admission wait={:?}",
        config.temp_dir.display(),
        config.image_max_body_length / 1024 / 1024,
        config.max_body_length / 1024 / 1024,
        config.admission_timeout
    );

    tokio::fs::create_dir_all(&config.temp_dir).await?;

    let admission_gate = gate::setup_gate(&config).await?;
    let pipeline = Arc::new(UploadPipeline::new(admission_gate.clone(), &config));

    let state = AppState {
        pipeline,
        waiting_list: Arc::new(MemoryWaitingList::new(config.waiting_list_capacity)),
        compressor: Arc::new(PassthroughCompressor),
        config: config.clone(),
    };

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweeper = GateSweeper::new(
        admission_gate.clone(),
        config.gate_sweep_interval,
        shutdown_rx,
    );
    tokio::spawn(sweeper.run());

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let client = request
                    .headers()
                    .get("cf-connecting-ip")
                    .or_else(|| request.headers().get("x-forwarded-for"))
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    client = %client,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr = config.bind_addr;
    info!("✅ Server ready at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    })
    .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
