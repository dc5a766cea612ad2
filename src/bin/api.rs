use gold_investment_agent::{api::start_server, config::AgentConfig, controller::SessionController};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env()?;

    if config.llm.api_key.is_none() {
        warn!("⚠️  OPENROUTER_API_KEY not set; advice questions will fail");
    }
    if config.price.api_url.is_none() {
        warn!("GOLDPRICE_API_URL not set; quoting the fallback price");
    }
    if config.database_url.is_none() {
        warn!("No database configured; purchases are kept in memory");
    }

    info!("🚀 Gold Investment Agent - API Server");
    info!("📍 Port: {}", config.port);

    let controller = Arc::new(SessionController::from_config(&config)?);

    if let Some(idle_timeout) = config.session_idle_timeout {
        let _sweeper = controller.spawn_idle_sweeper(idle_timeout);
        info!("🧹 Sweeping sessions idle for more than {:?}", idle_timeout);
    }

    info!("✅ Session controller initialized");
    info!("📡 Starting API server...");

    start_server(controller, config.port).await?;

    Ok(())
}
