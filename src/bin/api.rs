use biznavi::{api::start_server, config::Settings, service::TurnService};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    if settings.gemini_api_key.is_none() {
        eprintln!("GEMINI_API_KEY not set; unmatched questions get an out-of-domain reply");
    }

    info!("BizNavi API Server");
    info!("Port: {}", settings.api_port);

    let service = Arc::new(TurnService::from_settings(&settings)?);

    info!(store = service.store_backend(), "Turn service initialized");

    start_server(service, settings.api_port).await?;

    Ok(())
}
