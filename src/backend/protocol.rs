//! Text action protocol
//!
//! Used when capabilities are exchanged as plain chat text instead of native
//! tool calls. The model replies either with prose (the final answer) or with
//! a single JSON object:
//!
//! ```text
//! {"thought": "...", "capability": "market_data", "input": "BTCUSDT funding"}
//! {"final_answer": "..."}
//! ```

use crate::error::EngineError;
use crate::models::{CapabilityCall, CapabilitySpec, ReasoningStep, TranscriptEntry};
use crate::Result;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default, alias = "action", alias = "tool")]
    capability: Option<String>,
    #[serde(default, alias = "action_input", alias = "args")]
    input: Option<Value>,
    #[serde(default)]
    final_answer: Option<String>,
}

/// Instructions appended to the system prompt in text-protocol mode.
pub fn render_instructions(catalog: &[CapabilitySpec]) -> String {
    let mut out = String::from("You can use the following tools:\n\n");

    for spec in catalog {
        out.push_str(&format!("### {}\n{}\n\n", spec.name, spec.description.trim()));
    }

    out.push_str(
        r#"To use a tool, reply with ONLY one JSON object and nothing else:
{"thought": "<why>", "capability": "<tool name>", "input": "<tool input string>"}

You will receive the tool result in the next message. Use one tool at a time.
When you have enough information, reply with the final report as plain text
(or as {"final_answer": "<report>"})."#,
    );

    out
}

/// The assistant-side text of a previous call, as the model would have written it.
pub fn render_call(call: &CapabilityCall) -> String {
    let mut action = serde_json::json!({
        "capability": call.capability_name,
        "input": call.capability_input,
    });
    if let Some(thought) = &call.thought {
        action["thought"] = Value::String(thought.clone());
    }
    action.to_string()
}

/// The user-side message that feeds a transcript entry back to the model.
pub fn render_feedback(entry: &TranscriptEntry) -> String {
    match entry {
        TranscriptEntry::Exchange { call, observation } => format!(
            "Tool result from {} ({}):\n{}",
            call.capability_name, observation.status, observation.content
        ),
        TranscriptEntry::Correction { raw_error } => correction_message(raw_error),
    }
}

pub fn correction_message(error: &str) -> String {
    format!(
        "Your previous reply could not be used: {}\nReply with a single JSON tool action or with the final report.",
        error
    )
}

/// Parse a text-protocol reply into the next step.
///
/// Prose without a JSON object is a final answer. A JSON object (bare, or in a
/// ```json fence) must be a valid action, otherwise the reply is malformed.
/// Unparseable brace-led prose that names no action key stays a final answer.
pub fn parse_reply(output: &str) -> Result<ReasoningStep> {
    let trimmed = output.trim();

    if trimmed.is_empty() {
        return Err(EngineError::BackendProtocol("empty reply".to_string()));
    }

    let Some(json_str) = extract_action_json(trimmed) else {
        return Ok(ReasoningStep::FinalAnswer(trimmed.to_string()));
    };

    let envelope: ActionEnvelope = match serde_json::from_str(json_str) {
        Ok(envelope) => envelope,
        Err(_) if !trimmed.contains("```json") && !names_action_key(json_str) => {
            return Ok(ReasoningStep::FinalAnswer(trimmed.to_string()));
        }
        Err(e) => {
            return Err(EngineError::BackendProtocol(format!(
                "invalid JSON action: {} | raw={}",
                e, json_str
            )))
        }
    };

    if let Some(answer) = envelope.final_answer.filter(|a| !a.trim().is_empty()) {
        return Ok(ReasoningStep::FinalAnswer(answer));
    }

    let capability = envelope
        .capability
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            EngineError::BackendProtocol(
                "JSON action must contain 'capability' or 'final_answer'".to_string(),
            )
        })?;

    let input = match envelope.input {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => super::input_from_arguments(&other),
    };

    Ok(ReasoningStep::CapabilityCall(CapabilityCall {
        capability_name: capability,
        capability_input: input,
        call_id: None,
        thought: envelope.thought.filter(|t| !t.trim().is_empty()),
    }))
}

const ACTION_KEYS: [&str; 6] = [
    "capability",
    "action",
    "tool",
    "action_input",
    "args",
    "final_answer",
];

fn names_action_key(json_str: &str) -> bool {
    ACTION_KEYS
        .iter()
        .any(|key| json_str.contains(&format!("\"{}\"", key)))
}

/// Locate the JSON action in a reply: a ```json fence anywhere, or a reply
/// that is itself a JSON object.
fn extract_action_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }

    if text.starts_with('{') {
        let end = text.rfind('}')?;
        return Some(&text[..=end]);
    }

    None
}
