//! Reasoning backends
//!
//! Every provider sits behind [`ReasoningBackend::invoke`]: one request in,
//! one [`ReasoningStep`] out. Nothing above this module knows which provider
//! is active.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::EngineError;
use crate::models::{CapabilitySpec, ConversationTurn, ReasoningStep, TranscriptEntry};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod gemini;
pub mod openai;
pub mod protocol;
#[cfg(test)]
pub mod scripted;

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
#[cfg(test)]
pub use scripted::ScriptedBackend;

/// How capability calls are exchanged with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// Provider-native function/tool calling.
    NativeTools,
    /// Plain chat; the model answers with a JSON action object or prose.
    TextProtocol,
}

/// Everything the backend needs to decide its next step.
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    pub system_prompt: &'a str,
    pub query: &'a str,
    pub history: &'a [ConversationTurn],
    pub transcript: &'a [TranscriptEntry],
    pub catalog: &'a [CapabilitySpec],
    pub convention: CallingConvention,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    fn supports(&self, convention: CallingConvention) -> bool;

    /// Ask for the next step. Malformed provider output is reported as
    /// [`EngineError::BackendProtocol`].
    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ReasoningStep>;
}

/// Build the backend for the configured provider.
///
/// Fails with [`EngineError::Configuration`] before any network traffic when
/// the provider credential is missing.
pub fn configure(config: &ProviderConfig) -> Result<Arc<dyn ReasoningBackend>> {
    let api_key = config.require_credential()?.to_string();
    let client = build_http_client()?;

    info!(
        provider = %config.provider,
        model = %config.model,
        "Configuring reasoning backend"
    );

    let backend: Arc<dyn ReasoningBackend> = match config.provider {
        ProviderKind::OpenAi | ProviderKind::Groq => {
            Arc::new(OpenAiBackend::new(client, config, api_key))
        }
        ProviderKind::Gemini => Arc::new(GeminiBackend::new(client, config, api_key)),
    };

    Ok(backend)
}

/// Long-lived, connection-pooled client shared by one backend.
fn build_http_client() -> Result<Client> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| EngineError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

/// JSON schema of the single string argument every capability takes.
pub(crate) fn capability_parameters(spec: &CapabilitySpec) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "input": {
                "type": "string",
                "description": format!("Instruction for {}, see the tool description", spec.name),
            }
        },
        "required": ["input"],
    })
}

/// Pull the capability input out of native tool-call arguments.
pub(crate) fn input_from_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("input") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None if map.len() == 1 => map
                .values()
                .next()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_default(),
            None => arguments.to_string(),
        },
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_configure_requires_credential() {
        let result = configure(&ProviderConfig::new(ProviderKind::Groq));
        let err = result.err().expect("missing key must fail");

        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn test_configure_each_provider() {
        for kind in [ProviderKind::OpenAi, ProviderKind::Gemini, ProviderKind::Groq] {
            let backend = configure(&ProviderConfig::new(kind).with_credential("key")).unwrap();
            assert!(backend.supports(CallingConvention::TextProtocol));
        }
    }

    #[test]
    fn test_input_from_arguments() {
        assert_eq!(input_from_arguments(&json!({"input": "BTCUSDT funding"})), "BTCUSDT funding");
        assert_eq!(input_from_arguments(&json!({"query": "fed rate"})), "fed rate");
        assert_eq!(input_from_arguments(&json!("today")), "today");
        assert_eq!(input_from_arguments(&json!({"input": 5})), "5");
    }
}
