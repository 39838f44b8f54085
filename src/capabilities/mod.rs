//! Capability trait and registry
//!
//! A capability takes one short instruction string and answers with one
//! human-readable string. The registry is the boundary that guarantees no
//! failure, panic or hang inside a capability ever reaches the reasoning loop.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{CapabilitySpec, Observation, ObservationStatus};
use crate::Result;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::AbortOnDropHandle;
use tracing::{info, warn};

pub mod calendar;
pub mod document;
pub mod history;
mod http;
pub mod market_data;
pub mod news;

pub use calendar::EconomicCalendarCapability;
pub use document::DocumentReaderCapability;
pub use history::HistoryCapability;
pub use market_data::MarketDataCapability;
pub use news::NewsCapability;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const INPUT_PREVIEW_CHARS: usize = 120;

/// Trait for a single capability
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    /// Usage text shown to the reasoning backend, including the input format.
    fn description(&self) -> &str;

    /// Run the capability. Implementations describe their own expected
    /// failures in the returned text; an `Err` is rendered by the registry.
    async fn execute(&self, input: &str) -> Result<String>;
}

/// Ordered, fixed set of capabilities with unique names.
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
    call_timeout: Duration,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Build a registry from a list, failing on the first duplicate name.
    pub fn from_capabilities(capabilities: Vec<Arc<dyn Capability>>) -> Result<Self> {
        let mut registry = Self::new();
        for capability in capabilities {
            registry.register(capability)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        if self.get(capability.name()).is_some() {
            return Err(EngineError::DuplicateCapability(capability.name().to_string()));
        }
        self.capabilities.push(capability);
        Ok(())
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.iter().find(|c| c.name() == name).cloned()
    }

    pub fn capabilities(&self) -> &[Arc<dyn Capability>] {
        &self.capabilities
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub fn catalog(&self) -> Vec<CapabilitySpec> {
        self.capabilities
            .iter()
            .map(|c| CapabilitySpec {
                name: c.name().to_string(),
                description: c.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Dispatch one call. Never fails: unknown names, errors, panics and
    /// timeouts all come back as an [`Observation`] with descriptive text.
    pub async fn invoke(&self, name: &str, input: &str) -> Observation {
        let start = Instant::now();

        let Some(capability) = self.get(name) else {
            warn!(capability = %name, "Capability not registered");
            return Observation {
                capability_name: name.to_string(),
                content: format!(
                    "capability '{}' is not registered. Available capabilities: {}",
                    name,
                    self.names().join(", ")
                ),
                status: ObservationStatus::UnknownCapability,
                execution_time_ms: 0,
            };
        };

        // A separate task turns a panic into a JoinError instead of unwinding
        // through the caller. Dropping the handle aborts it.
        let owned_input = input.to_string();
        let mut handle =
            AbortOnDropHandle::new(tokio::spawn(async move { capability.execute(&owned_input).await }));

        let (status, content) = match tokio::time::timeout(self.call_timeout, &mut handle).await {
            Ok(Ok(Ok(text))) => (ObservationStatus::Success, text),
            Ok(Ok(Err(e))) => (
                ObservationStatus::Failed,
                format!("capability {} failed: {}", name, e),
            ),
            Ok(Err(join_error)) => {
                let cause = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                (
                    ObservationStatus::Failed,
                    format!("capability {} failed: {}", name, cause),
                )
            }
            Err(_) => {
                handle.abort();
                (
                    ObservationStatus::TimedOut,
                    format!(
                        "capability {} failed: timed out after {:?}",
                        name, self.call_timeout
                    ),
                )
            }
        };

        let execution_time_ms = start.elapsed().as_millis() as u64;

        info!(
            capability = %name,
            outcome = %status,
            duration_ms = execution_time_ms,
            input_preview = %preview(input, INPUT_PREVIEW_CHARS),
            "capability_audit"
        );

        Observation {
            capability_name: name.to_string(),
            content,
            status,
            execution_time_ms,
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Character-safe prefix of `text`, with an ellipsis when cut.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

/// Registry with the five analyst capabilities, in the order they are
/// presented to the backend.
pub async fn create_default_registry(config: &EngineConfig) -> Result<CapabilityRegistry> {
    let client = http::build_client()?;

    let history = HistoryCapability::open(&config.history_db_path).await;

    let mut registry = CapabilityRegistry::new().with_timeout(config.agent.step_timeout);
    registry.register(Arc::new(DocumentReaderCapability::new(
        client.clone(),
        &config.documents_dir,
    )))?;
    registry.register(Arc::new(NewsCapability::new(client.clone())))?;
    registry.register(Arc::new(MarketDataCapability::new(
        client,
        config.cryptoquant_api_key.clone(),
    )))?;
    registry.register(Arc::new(EconomicCalendarCapability::new()))?;
    registry.register(Arc::new(history))?;

    info!(capabilities = ?registry.names(), "Capabilities registered");
    Ok(registry)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_duplicate_names_fail_construction() {
        let result = CapabilityRegistry::from_capabilities(vec![
            Arc::new(FixedCapability::new("news", "a")),
            Arc::new(FixedCapability::new("news", "b")),
        ]);

        assert!(matches!(result, Err(EngineError::DuplicateCapability(ref n)) if n == "news"));
    }

    #[test]
    fn test_catalog_preserves_registration_order() {
        let registry = CapabilityRegistry::from_capabilities(vec![
            Arc::new(FixedCapability::new("market_data", "a")),
            Arc::new(FixedCapability::new("news", "b")),
            Arc::new(FixedCapability::new("history", "c")),
        ])
        .unwrap();

        assert_eq!(registry.names(), vec!["market_data", "news", "history"]);
        assert_eq!(registry.catalog()[1].name, "news");
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let registry = CapabilityRegistry::from_capabilities(vec![Arc::new(
            FixedCapability::new("market_data", "Funding Rate: 0.01%"),
        )])
        .unwrap();

        let observation = registry.invoke("market_data", "BTCUSDT funding").await;
        assert_eq!(observation.status, ObservationStatus::Success);
        assert_eq!(observation.content, "Funding Rate: 0.01%");
    }

    #[tokio::test]
    async fn test_unknown_capability_lists_available() {
        let registry = CapabilityRegistry::from_capabilities(vec![Arc::new(
            FixedCapability::new("news", "x"),
        )])
        .unwrap();

        let observation = registry.invoke("weather", "rome").await;
        assert_eq!(observation.status, ObservationStatus::UnknownCapability);
        assert!(observation.content.contains("'weather'"));
        assert!(observation.content.contains("news"));
    }

    #[tokio::test]
    async fn test_internal_faults_never_cross_the_boundary() {
        for (fault, expected_status, expected_text) in [
            (Fault::Error, ObservationStatus::Failed, "upstream returned 503"),
            (Fault::Panic, ObservationStatus::Failed, "index out of bounds"),
            (Fault::Hang, ObservationStatus::TimedOut, "timed out"),
        ] {
            let registry = CapabilityRegistry::from_capabilities(vec![Arc::new(
                FaultyCapability { fault },
            )])
            .unwrap()
            .with_timeout(Duration::from_millis(50));

            let observation = registry.invoke("faulty", "anything").await;

            assert_eq!(observation.status, expected_status);
            assert!(observation.content.starts_with("capability faulty failed: "));
            assert!(
                observation.content.contains(expected_text),
                "unexpected text: {}",
                observation.content
            );
        }
    }

    #[tokio::test]
    async fn test_timeout_text_keeps_sub_second_precision() {
        let registry = CapabilityRegistry::from_capabilities(vec![Arc::new(FaultyCapability {
            fault: Fault::Hang,
        })])
        .unwrap()
        .with_timeout(Duration::from_millis(50));

        let observation = registry.invoke("faulty", "x").await;
        assert_eq!(observation.content, "capability faulty failed: timed out after 50ms");
    }

    /// Counts ticks until it is aborted.
    struct TickingCapability {
        ticks: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Capability for TickingCapability {
        fn name(&self) -> &str {
            "ticking"
        }

        fn description(&self) -> &str {
            "Ticks every 10 ms"
        }

        async fn execute(&self, _input: &str) -> Result<String> {
            loop {
                self.ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    #[tokio::test]
    async fn test_dropped_invoke_aborts_the_capability_task() {
        use std::sync::atomic::Ordering;

        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let registry = CapabilityRegistry::from_capabilities(vec![Arc::new(TickingCapability {
            ticks: Arc::clone(&ticks),
        })])
        .unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), registry.invoke("ticking", "x")).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_cancel = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(after_cancel > 0);
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("perché", 4), "perc...");
        assert_eq!(preview("ok", 10), "ok");
    }
}
