//! REST API server for the analysis engine
//!
//! Exposes `analyze` over HTTP for the web frontend.

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::engine::AnalysisEngine;
use crate::models::{AnalysisResult, ConversationTurn};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<AnalysisEngine>,
}

/// =============================
/// Info & Health Endpoints
/// =============================

async fn root() -> Json<Value> {
    Json(serde_json::json!({
        "message": "Lab Trading Agent API",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<ApiState>) -> Json<Value> {
    let engine = &state.engine;
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "agent": if engine.is_ready() { "ready" } else { "unavailable" },
        "strategy": engine.state().strategy(),
        "backend": engine.backend_name(),
    }))
}

/// =============================
/// Analysis Endpoint
/// =============================

/// Always 200: failures are reported through `ok` and `report`.
async fn analyze(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> Json<AnalysisResult> {
    info!(
        query = %req.query,
        has_context = req.context.is_some(),
        history_len = req.history.len(),
        "Received analysis request"
    );

    let result = state.engine.analyze(&req.query, req.context, req.history).await;

    info!(ok = result.ok, report_len = result.report.len(), "Analysis request finished");
    Json(result)
}

/// =============================
/// Router
/// =============================

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(origins)
}

pub fn create_router(engine: Arc<AnalysisEngine>, allowed_origins: &[String]) -> Router {
    let state = ApiState { engine };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    engine: Arc<AnalysisEngine>,
    config: &ServerConfig,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(engine, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", config.port);
    info!("Local: http://127.0.0.1:{}", config.port);

    axum::serve(listener, router).await?;

    Ok(())
}
