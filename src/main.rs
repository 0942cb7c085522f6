use clap::Parser;
use doc_convert_service::config::ConversionConfig;
use doc_convert_service::services::cleanup::sweep_work_root;
use doc_convert_service::{AppState, create_app};
use dotenvy::dotenv;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the API server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_convert_service=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Document Conversion Service...");

    let config = ConversionConfig::from_env();
    info!(
        "⚙️  Conversion Config: Max Files={}, Max Size={}MB, Timeout={}s, Parallel={}",
        config.max_files,
        config.max_file_size / 1024 / 1024,
        config.conversion_timeout_secs,
        config.max_concurrent_conversions
    );

    // 2. Working Directory
    tokio::fs::create_dir_all(&config.work_dir).await?;
    let work_dir = config.work_dir.clone();
    let swept = tokio::task::spawn_blocking(move || sweep_work_root(&work_dir)).await?;
    if swept > 0 {
        info!("🧹 Removed {} stale request director(ies)", swept);
    }
    info!("📁 Work directory: {}", config.work_dir.display());

    // 3. External Converters
    let state = AppState::new(config.clone());
    for pipeline in [&state.docx_pipeline, &state.pdf_pipeline] {
        if pipeline.converter().health_check().await {
            info!("✅ [{}] converter is available", pipeline.kind());
        } else {
            warn!(
                "⚠️  [{}] converter is not responding; requests will fail per file",
                pipeline.kind()
            );
        }
    }

    // 4. HTTP Server
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
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
        );

    let app = create_app(state).layer(trace_layer);
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    let addr = listener.local_addr()?;

    info!("✅ API Server listening on: http://{}", addr);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    info!("🛑 Shutting down, clearing work directory...");
    let work_dir = config.work_dir.clone();
    tokio::task::spawn_blocking(move || {
        sweep_work_root(&work_dir);
        // Only an emptied root is removed
        if let Err(e) = std::fs::remove_dir(&work_dir) {
            tracing::debug!("Work directory {} kept: {}", work_dir.display(), e);
        }
    })
    .await?;

    info!("👋 Service exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
