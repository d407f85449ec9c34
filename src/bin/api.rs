use olive_forecast::{
    api::{start_server, ApiState},
    config::Settings,
    platform::Platform,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    if settings.gemini_api_key.is_none() {
        info!("GEMINI_API_KEY not set, chat answers use deterministic phrasing");
    }

    let port = settings.api_port;
    info!(port, lake = %settings.lake_root.display(), "olive forecast API server");

    let platform = Platform::new(settings)?;
    let state = ApiState::new(platform);

    info!(memory = state.assistant.memory_backend(), "platform initialized");

    start_server(state, port).await?;

    Ok(())
}
