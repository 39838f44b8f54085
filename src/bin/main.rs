use lab_trading_agent::{AnalysisEngine, EngineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SAMPLE_QUERIES: [&str; 3] = [
    "Qual è il funding rate attuale di BTCUSDT?",
    "Analizza il sentiment di mercato per Bitcoin oggi",
    "Quali eventi macro sono previsti questa settimana?",
];

const PREVIEW_CHARS: usize = 500;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Lab Trading Agent analyst starting");

    let config = EngineConfig::from_env()?;
    let engine = AnalysisEngine::from_config(&config).await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let queries: Vec<String> = if args.is_empty() {
        SAMPLE_QUERIES.iter().map(|q| q.to_string()).collect()
    } else {
        vec![args.join(" ")]
    };

    for query in &queries {
        info!(query = %query, "Running analysis");

        let result = engine.analyze(query, None, Vec::new()).await;

        println!("\n=== {} ===", query);
        println!("OK: {}", result.ok);
        println!("Timestamp: {}", result.timestamp);
        println!("\n{}", preview(&result.report));
    }

    Ok(())
}

fn preview(report: &str) -> String {
    if report.chars().count() <= PREVIEW_CHARS {
        return report.to_string();
    }
    format!("{}...", report.chars().take(PREVIEW_CHARS).collect::<String>())
}
