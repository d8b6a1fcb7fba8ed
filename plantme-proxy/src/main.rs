use plantme_proxy::config::LogFormat;
use plantme_proxy::{ProxyConfig, create_app};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "plantme_proxy=debug,plantme=debug,tower_http=debug";

fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
        // One line per event, for tailing next to the backend's own logs
        LogFormat::Compact => registry.with(fmt::layer().compact().with_target(false)).init(),
        // Keeps the request span so every line carries its correlation id
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_level(true),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ProxyConfig::from_env();
    init_tracing(config.log_format);
    let app = create_app(&config)?;

    let listener = TcpListener::bind(config.listen_addr()).await?;
    let addr = listener.local_addr()?;

    info!("PlantMe proxy starting on {}", addr);
    info!("Forwarding to backend at {}", config.backend_base_url);
    info!("Chat endpoint: POST http://{}/api/chat", addr);
    info!("Upload endpoint: POST http://{}/api/upload", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
