//! Core data models for the analysis engine

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn supplied by the caller. Never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

//
// ================= Reasoning =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityCall {
    pub capability_name: String,
    pub capability_input: String,
    /// Provider-assigned call id (native tool calling only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Free text the backend emitted alongside the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}

impl CapabilityCall {
    pub fn new(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            capability_name: name.into(),
            capability_input: input.into(),
            call_id: None,
            thought: None,
        }
    }
}

/// One decision of the reasoning backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningStep {
    FinalAnswer(String),
    CapabilityCall(CapabilityCall),
}

/// Name and usage text of a capability, as shown to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Success,
    Failed,
    TimedOut,
    UnknownCapability,
}

/// What came back from dispatching one capability call. `content` is always
/// a human-readable string, including on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub capability_name: String,
    pub content: String,
    pub status: ObservationStatus,
    pub execution_time_ms: u64,
}

/// A (request, result) pair accumulated while a single query runs.
#[derive(Debug, Clone)]
pub enum TranscriptEntry {
    Exchange {
        call: CapabilityCall,
        observation: Observation,
    },
    /// Backend output that could not be used, with the correction fed back.
    Correction {
        raw_error: String,
    },
}

//
// ================= Final Result =================
//

/// The only externally visible shape of a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisResult {
    pub report: String,
    pub sources: Vec<String>,
    pub timestamp: String,
    pub ok: bool,
}

impl AnalysisResult {
    pub fn success(report: impl Into<String>) -> Self {
        Self::stamped(report.into(), true)
    }

    pub fn failure(report: impl Into<String>) -> Self {
        Self::stamped(report.into(), false)
    }

    fn stamped(report: String, ok: bool) -> Self {
        Self {
            report,
            sources: Vec::new(),
            timestamp: Utc::now().to_rfc3339(),
            ok,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObservationStatus::Success => "ok",
            ObservationStatus::Failed => "error",
            ObservationStatus::TimedOut => "timeout",
            ObservationStatus::UnknownCapability => "unknown_capability",
        };
        write!(f, "{}", s)
    }
}
