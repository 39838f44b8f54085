use lab_trading_agent::{api::start_server, error::EngineError, AnalysisEngine, EngineConfig};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env()?;

    info!("🚀 Lab Trading Agent - API Server");
    info!("📍 Port: {}", config.server.port);
    info!(provider = %config.provider.provider, model = %config.provider.model, "LLM provider");

    let engine = match AnalysisEngine::from_config(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("❌ {}", e);
            if matches!(e, EngineError::Configuration(_)) {
                eprintln!("📌 Set the credential in .env (see .env.example)");
            }
            return Err(e.into());
        }
    };

    if engine.is_ready() {
        info!("✅ Analysis engine initialized");
    } else {
        warn!("⚠️  Analysis engine unavailable; queries will return ok=false");
    }

    info!("📡 Starting API server...");
    start_server(Arc::new(engine), &config.server).await?;

    Ok(())
}
