//! The analysis engine: one instance per process
//!
//! Construction configures the backend (the only step allowed to fail) and
//! selects an orchestration strategy. `analyze` then never fails.

use crate::backend::{self, ReasoningBackend};
use crate::capabilities::{create_default_registry, CapabilityRegistry};
use crate::config::{AgentSettings, EngineConfig};
use crate::models::{AnalysisResult, ConversationTurn};
use crate::normalizer;
use crate::orchestration::{OrchestrationState, StrategySelector};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info};
use uuid::Uuid;

pub struct AnalysisEngine {
    state: Arc<OrchestrationState>,
    backend_name: String,
}

impl AnalysisEngine {
    /// Configure the provider from `config` and wire it to `registry`.
    ///
    /// Fails with a `Configuration` error when the provider credential is
    /// missing, before any strategy is tried.
    pub fn new(config: &EngineConfig, registry: CapabilityRegistry) -> Result<Self> {
        let backend = backend::configure(&config.provider)?;
        Ok(Self::from_parts(
            backend,
            registry,
            &config.agent,
            &StrategySelector::with_default_strategies(),
        ))
    }

    /// Configure the provider, then build the default capability registry.
    ///
    /// A missing credential is reported before any capability is opened, so
    /// nothing touches the disk or the network on a misconfigured start.
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let backend = backend::configure(&config.provider)?;
        let registry = create_default_registry(config).await?;
        Ok(Self::from_parts(
            backend,
            registry,
            &config.agent,
            &StrategySelector::with_default_strategies(),
        ))
    }

    /// Build from an already configured backend.
    pub fn from_parts(
        backend: Arc<dyn ReasoningBackend>,
        registry: CapabilityRegistry,
        settings: &AgentSettings,
        selector: &StrategySelector,
    ) -> Self {
        let registry = Arc::new(registry);
        let state = selector.select(&backend, &registry, settings);

        info!(
            backend = backend.name(),
            ready = state.is_ready(),
            strategy = state.strategy().unwrap_or("none"),
            "Analysis engine constructed"
        );

        Self {
            state: Arc::new(state),
            backend_name: backend.name().to_string(),
        }
    }

    pub fn state(&self) -> &OrchestrationState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Answer one query. Every outcome, including a panic inside the loop,
    /// comes back as an [`AnalysisResult`].
    pub async fn analyze(
        &self,
        query: &str,
        context: Option<Value>,
        history: Vec<ConversationTurn>,
    ) -> AnalysisResult {
        let agent = match self.state.as_ref() {
            OrchestrationState::Ready(agent) => agent.clone(),
            OrchestrationState::Unavailable(reason) => return normalizer::unavailable(reason),
        };

        let query_id = Uuid::new_v4();
        let query = query.to_string();
        debug!(%query_id, query = %query, "Analysis task spawned");

        // Aborted if the caller stops waiting, e.g. a dropped HTTP request.
        let handle = AbortOnDropHandle::new(tokio::spawn(async move {
            agent.run(&query, context.as_ref(), &history).await
        }));

        match handle.await {
            Ok(outcome) => normalizer::normalize(outcome),
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let cause = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                normalizer::failure(format!("internal error: {}", cause))
            }
            Err(join_error) => normalizer::failure(join_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CallingConvention, ScriptedBackend};
    use crate::capabilities::testing::{Fault, FaultyCapability, FixedCapability};
    use crate::config::{ProviderConfig, ProviderKind};
    use crate::error::EngineError;
    use crate::models::{CapabilityCall, ReasoningStep};
    use std::time::Duration;

    const FUNDING: &str = "Funding rate for BTCUSDT:\n- Funding Rate: 0.0100%\n- Exchange: Binance";

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::from_capabilities(vec![
            Arc::new(FixedCapability::new("market_data", FUNDING)),
            Arc::new(FaultyCapability { fault: Fault::Panic }),
        ])
        .unwrap()
    }

    fn engine(backend: ScriptedBackend) -> AnalysisEngine {
        AnalysisEngine::from_parts(
            Arc::new(backend),
            registry(),
            &AgentSettings::default(),
            &StrategySelector::with_default_strategies(),
        )
    }

    fn funding_script() -> ScriptedBackend {
        ScriptedBackend::new()
            .then_call("market_data", "BTCUSDT funding")
            .then_answer(&format!("Current funding:\n{}", FUNDING))
    }

    #[tokio::test]
    async fn test_funding_rate_scenario() {
        let engine = engine(funding_script());
        assert!(engine.is_ready());

        let result = engine
            .analyze("Qual è il funding rate attuale di BTCUSDT?", None, Vec::new())
            .await;

        assert!(result.ok);
        assert!(result.report.contains("Funding Rate: 0.0100%"));
        assert!(result.sources.is_empty());
    }

    #[test]
    fn test_missing_credential_fails_construction() {
        let mut config = crate::config::EngineConfig::from_lookup(|_| None).unwrap();
        config.provider = ProviderConfig::new(ProviderKind::Groq);

        let err = match AnalysisEngine::new(&config, registry()) {
            Ok(_) => panic!("construction should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[tokio::test]
    async fn test_missing_credential_reported_before_capabilities_open() {
        let dir = std::env::temp_dir().join(format!("lab-trading-agent-{}", Uuid::new_v4()));
        let mut config = crate::config::EngineConfig::from_lookup(|_| None).unwrap();
        config.provider = ProviderConfig::new(ProviderKind::OpenAi);
        config.history_db_path = dir.join("history.db").to_string_lossy().into_owned();

        let err = match AnalysisEngine::from_config(&config).await {
            Ok(_) => panic!("construction should fail"),
            Err(e) => e,
        };

        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_valid_credential_reaches_ready() {
        let mut config = crate::config::EngineConfig::from_lookup(|_| None).unwrap();
        config.provider = ProviderConfig::new(ProviderKind::Gemini).with_credential("test-key");

        let engine = AnalysisEngine::new(&config, registry()).unwrap();
        assert!(engine.is_ready());
        assert_eq!(engine.state().strategy(), Some("tool_calling"));
    }

    #[tokio::test]
    async fn test_secondary_strategy_gives_same_result_shape() {
        let primary = engine(funding_script());
        let secondary =
            engine(funding_script().with_conventions(&[CallingConvention::TextProtocol]));
        assert_eq!(secondary.state().strategy(), Some("text_protocol"));

        let a = primary.analyze("funding?", None, Vec::new()).await;
        let b = secondary.analyze("funding?", None, Vec::new()).await;

        assert_eq!((a.ok, &a.report, &a.sources), (b.ok, &b.report, &b.sources));
    }

    #[tokio::test]
    async fn test_unavailable_engine_answers_every_query() {
        let engine = engine(ScriptedBackend::new().with_conventions(&[]));
        assert!(!engine.is_ready());

        for query in ["any query", "", "BTC?"] {
            let result = engine.analyze(query, None, Vec::new()).await;
            assert!(!result.ok);
            assert!(result.sources.is_empty());
            assert!(result.report.to_lowercase().contains("orchestration unavailable"));
        }
    }

    #[tokio::test]
    async fn test_panicking_capability_does_not_fail_query() {
        let engine = engine(
            ScriptedBackend::new()
                .then_call("faulty", "boom")
                .then_answer("Answered anyway."),
        );

        let result = engine.analyze("q", None, Vec::new()).await;
        assert!(result.ok);
        assert_eq!(result.report, "Answered anyway.");
    }

    #[tokio::test]
    async fn test_never_finalizing_backend_stops_at_ceiling() {
        let backend = Arc::new(ScriptedBackend::new().repeating(ReasoningStep::CapabilityCall(
            CapabilityCall::new("market_data", "BTCUSDT funding"),
        )));
        let engine = AnalysisEngine::from_parts(
            backend.clone(),
            registry(),
            &AgentSettings::default(),
            &StrategySelector::default(),
        );

        let result = engine.analyze("q", None, Vec::new()).await;

        assert!(result.ok);
        assert!(!result.report.is_empty());
        assert_eq!(backend.invocations(), 15);
    }

    #[tokio::test]
    async fn test_backend_panic_and_transport_error_become_failures() {
        let panicking = engine(ScriptedBackend::new().then_panic("provider client bug"));
        let result = panicking.analyze("q", None, Vec::new()).await;
        assert!(!result.ok);
        assert!(result.report.contains("provider client bug"));

        let failing = engine(ScriptedBackend::new().then_backend_error("HTTP 401"));
        let result = failing.analyze("q", None, Vec::new()).await;
        assert!(!result.ok);
        assert!(result.report.contains("HTTP 401"));
    }

    #[tokio::test]
    async fn test_dropped_analyze_stops_the_loop() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_step_delay(Duration::from_millis(50))
                .repeating(ReasoningStep::CapabilityCall(CapabilityCall::new(
                    "market_data",
                    "BTCUSDT funding",
                ))),
        );
        let engine = AnalysisEngine::from_parts(
            backend.clone(),
            registry(),
            &AgentSettings::default(),
            &StrategySelector::default(),
        );

        let cancelled =
            tokio::time::timeout(Duration::from_millis(60), engine.analyze("q", None, Vec::new()))
                .await;
        assert!(cancelled.is_err());

        let at_cancel = backend.invocations();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(backend.invocations(), at_cancel);
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_the_engine() {
        let engine = Arc::new(engine(
            ScriptedBackend::new().repeating(ReasoningStep::FinalAnswer("done".to_string())),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.analyze(&format!("q{}", i), None, Vec::new()).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().ok);
        }
    }
}
