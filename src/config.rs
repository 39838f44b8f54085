//! Startup configuration
//!
//! Everything is read once from the environment (after `.env` is loaded by the
//! binaries) and is immutable afterwards.

use crate::error::EngineError;
use crate::Result;
use std::fmt;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_ITERATIONS: usize = 15;
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_HISTORY_DB_PATH: &str = "data/trading_history.db";
pub const DEFAULT_DOCUMENTS_DIR: &str = "data/documents";
pub const DEFAULT_PORT: u16 = 8000;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The reasoning providers the engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    Groq,
}

impl ProviderKind {
    /// Map a provider id to a backend. Unknown ids fall back to OpenAI.
    pub fn from_id(id: &str) -> Self {
        match id.trim().to_lowercase().as_str() {
            "openai" | "gpt" => ProviderKind::OpenAi,
            "gemini" | "google" => ProviderKind::Gemini,
            "groq" => ProviderKind::Groq,
            other => {
                warn!(provider = %other, "Unknown LLM provider, using openai");
                ProviderKind::OpenAi
            }
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn credential_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GOOGLE_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-3.5-turbo",
            ProviderKind::Gemini => "gemini-pro",
            ProviderKind::Groq => "llama-3.1-70b-versatile",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => OPENAI_BASE_URL,
            ProviderKind::Gemini => GEMINI_BASE_URL,
            ProviderKind::Groq => GROQ_BASE_URL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
        };
        write!(f, "{}", s)
    }
}

/// Identifies the single active reasoning backend.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub credential: Option<String>,
    pub base_url: Option<String>,
    /// Whether the model may be driven through native tool calling.
    pub tool_calling: bool,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            temperature: DEFAULT_TEMPERATURE,
            credential: None,
            base_url: None,
            tool_calling: true,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// The API key, or a `Configuration` error naming the missing variable.
    pub fn require_credential(&self) -> Result<&str> {
        match self.credential.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(EngineError::Configuration(format!(
                "{} not set for provider '{}'",
                self.provider.credential_var(),
                self.provider
            ))),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

// Keeps the credential out of logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("tool_calling", &self.tool_calling)
            .finish()
    }
}

/// Limits applied to every query run by the reasoning loop.
#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub step_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub provider: ProviderConfig,
    pub agent: AgentSettings,
    pub history_db_path: String,
    /// Local PDFs are only read from inside this directory.
    pub documents_dir: String,
    pub cryptoquant_api_key: Option<String>,
    pub server: ServerConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Blank values are
    /// treated as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = ProviderKind::from_id(&get("LLM_PROVIDER").unwrap_or_else(|| "openai".into()));

        let mut provider_config = ProviderConfig::new(provider);
        provider_config.credential = get(provider.credential_var());
        provider_config.base_url = get("LLM_BASE_URL");
        if let Some(model) = get("LLM_MODEL") {
            provider_config.model = model;
        }
        if let Some(raw) = get("LLM_TEMPERATURE") {
            provider_config.temperature = parse_var("LLM_TEMPERATURE", &raw)?;
        }
        if let Some(raw) = get("LLM_TOOL_CALLING") {
            provider_config.tool_calling = parse_var("LLM_TOOL_CALLING", &raw)?;
        }

        let mut agent = AgentSettings::default();
        if let Some(raw) = get("AGENT_MAX_ITERATIONS") {
            agent.max_iterations = parse_var("AGENT_MAX_ITERATIONS", &raw)?;
        }
        if let Some(raw) = get("AGENT_STEP_TIMEOUT_SECS") {
            agent.step_timeout = Duration::from_secs(parse_var("AGENT_STEP_TIMEOUT_SECS", &raw)?);
        }

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_var("PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);

        Ok(Self {
            provider: provider_config,
            agent,
            history_db_path: get("HISTORY_DB_PATH")
                .unwrap_or_else(|| DEFAULT_HISTORY_DB_PATH.to_string()),
            documents_dir: get("DOCUMENTS_DIR").unwrap_or_else(|| DEFAULT_DOCUMENTS_DIR.to_string()),
            cryptoquant_api_key: get("CRYPTOQUANT_API_KEY"),
            server: ServerConfig {
                port,
                allowed_origins,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        EngineError::Configuration(format!("{} has an invalid value: '{}'", key, raw))
    })
}
