//! Orchestration strategy selection
//!
//! Strategies are tried in priority order, once, when the engine is built. The
//! first one that constructs wins; if none does, the engine is left
//! `Unavailable` and answers every query with the collected reasons.

use crate::agent::ReasoningLoop;
use crate::backend::{CallingConvention, ReasoningBackend};
use crate::capabilities::CapabilityRegistry;
use crate::config::AgentSettings;
use crate::error::EngineError;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Longest function name the tool-calling providers accept.
const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Result of strategy selection, fixed for the engine's lifetime.
#[derive(Clone)]
pub enum OrchestrationState {
    Ready(ReasoningLoop),
    Unavailable(String),
}

impl OrchestrationState {
    pub fn is_ready(&self) -> bool {
        matches!(self, OrchestrationState::Ready(_))
    }

    /// Name of the strategy in use, `None` when unavailable.
    pub fn strategy(&self) -> Option<&'static str> {
        match self {
            OrchestrationState::Ready(agent) => Some(agent.strategy()),
            OrchestrationState::Unavailable(_) => None,
        }
    }
}

/// One way of wiring a backend to a capability set.
pub trait OrchestrationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with [`EngineError::Construction`] when this wiring is not
    /// possible for the given backend and capabilities.
    fn build(
        &self,
        backend: &Arc<dyn ReasoningBackend>,
        registry: &Arc<CapabilityRegistry>,
        settings: &AgentSettings,
    ) -> Result<ReasoningLoop>;
}

/// Native tool calling with the full capability catalog.
pub struct ToolCallingStrategy;

impl OrchestrationStrategy for ToolCallingStrategy {
    fn name(&self) -> &'static str {
        "tool_calling"
    }

    fn build(
        &self,
        backend: &Arc<dyn ReasoningBackend>,
        registry: &Arc<CapabilityRegistry>,
        settings: &AgentSettings,
    ) -> Result<ReasoningLoop> {
        check_ceiling(settings)?;

        if !backend.supports(CallingConvention::NativeTools) {
            return Err(EngineError::Construction(format!(
                "backend '{}' does not support native tool calling",
                backend.name()
            )));
        }

        if let Some(bad) = registry.names().into_iter().find(|n| !is_function_name(n)) {
            return Err(EngineError::Construction(format!(
                "capability name '{}' cannot be declared as a function",
                bad
            )));
        }

        Ok(ReasoningLoop::new(
            self.name(),
            Arc::clone(backend),
            Arc::clone(registry),
            CallingConvention::NativeTools,
            settings,
        ))
    }
}

/// Plain chat with a JSON action protocol; works with any text backend.
pub struct TextProtocolStrategy;

impl OrchestrationStrategy for TextProtocolStrategy {
    fn name(&self) -> &'static str {
        "text_protocol"
    }

    fn build(
        &self,
        backend: &Arc<dyn ReasoningBackend>,
        registry: &Arc<CapabilityRegistry>,
        settings: &AgentSettings,
    ) -> Result<ReasoningLoop> {
        check_ceiling(settings)?;

        if !backend.supports(CallingConvention::TextProtocol) {
            return Err(EngineError::Construction(format!(
                "backend '{}' does not support plain text completions",
                backend.name()
            )));
        }

        Ok(ReasoningLoop::new(
            self.name(),
            Arc::clone(backend),
            Arc::clone(registry),
            CallingConvention::TextProtocol,
            settings,
        ))
    }
}

fn check_ceiling(settings: &AgentSettings) -> Result<()> {
    if settings.max_iterations == 0 {
        return Err(EngineError::Construction(
            "iteration ceiling must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn is_function_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FUNCTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Ordered list of strategies, highest fidelity first.
pub struct StrategySelector {
    strategies: Vec<Box<dyn OrchestrationStrategy>>,
}

impl StrategySelector {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Tool calling first, then the text protocol.
    pub fn with_default_strategies() -> Self {
        let mut selector = Self::new();
        selector.add_strategy(Box::new(ToolCallingStrategy));
        selector.add_strategy(Box::new(TextProtocolStrategy));
        selector
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn OrchestrationStrategy>) {
        self.strategies.push(strategy);
    }

    /// Try each strategy in order. Never fails.
    pub fn select(
        &self,
        backend: &Arc<dyn ReasoningBackend>,
        registry: &Arc<CapabilityRegistry>,
        settings: &AgentSettings,
    ) -> OrchestrationState {
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.build(backend, registry, settings) {
                Ok(agent) => {
                    info!(
                        strategy = strategy.name(),
                        backend = backend.name(),
                        capabilities = registry.len(),
                        max_iterations = settings.max_iterations,
                        "Orchestration ready"
                    );
                    return OrchestrationState::Ready(agent);
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Orchestration strategy unavailable");
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        let reason = if failures.is_empty() {
            "no orchestration strategy configured".to_string()
        } else {
            failures.join("; ")
        };

        warn!(reason = %reason, "All orchestration strategies failed");
        OrchestrationState::Unavailable(reason)
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::with_default_strategies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::capabilities::testing::FixedCapability;
    use crate::capabilities::Capability;

    fn registry(names: &[&'static str]) -> Arc<CapabilityRegistry> {
        Arc::new(
            CapabilityRegistry::from_capabilities(
                names
                    .iter()
                    .map(|&n| Arc::new(FixedCapability::new(n, "ok")) as Arc<dyn Capability>)
                    .collect(),
            )
            .unwrap(),
        )
    }

    fn backend(conventions: &[CallingConvention]) -> Arc<dyn ReasoningBackend> {
        Arc::new(ScriptedBackend::new().with_conventions(conventions))
    }

    #[test]
    fn test_primary_strategy_preferred() {
        let state = StrategySelector::with_default_strategies().select(
            &backend(&[CallingConvention::NativeTools, CallingConvention::TextProtocol]),
            &registry(&["market_data"]),
            &AgentSettings::default(),
        );

        assert_eq!(state.strategy(), Some("tool_calling"));
    }

    #[test]
    fn test_falls_back_when_native_tools_unsupported() {
        let state = StrategySelector::with_default_strategies().select(
            &backend(&[CallingConvention::TextProtocol]),
            &registry(&["market_data"]),
            &AgentSettings::default(),
        );

        let OrchestrationState::Ready(agent) = state else {
            panic!("expected Ready");
        };
        assert_eq!(agent.strategy(), "text_protocol");
        assert_eq!(agent.convention(), CallingConvention::TextProtocol);
        assert_eq!(agent.max_iterations(), 15);
    }

    #[test]
    fn test_falls_back_on_undeclarable_capability_name() {
        let state = StrategySelector::with_default_strategies().select(
            &backend(&[CallingConvention::NativeTools, CallingConvention::TextProtocol]),
            &registry(&["market data"]),
            &AgentSettings::default(),
        );

        assert_eq!(state.strategy(), Some("text_protocol"));
    }

    #[test]
    fn test_all_strategies_failing_is_unavailable() {
        let state = StrategySelector::with_default_strategies().select(
            &backend(&[]),
            &registry(&["news"]),
            &AgentSettings::default(),
        );

        let OrchestrationState::Unavailable(reason) = state else {
            panic!("expected Unavailable");
        };
        assert!(reason.contains("tool_calling: "));
        assert!(reason.contains("text_protocol: "));
    }

    #[test]
    fn test_zero_ceiling_and_empty_selector() {
        let settings = AgentSettings {
            max_iterations: 0,
            ..AgentSettings::default()
        };
        let state = StrategySelector::default().select(
            &backend(&[CallingConvention::NativeTools]),
            &registry(&[]),
            &settings,
        );
        assert!(!state.is_ready());

        let state = StrategySelector::new().select(
            &backend(&[CallingConvention::NativeTools]),
            &registry(&[]),
            &AgentSettings::default(),
        );
        assert!(matches!(state, OrchestrationState::Unavailable(ref r) if r.contains("no orchestration strategy")));
    }
}
