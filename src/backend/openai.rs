//! OpenAI-compatible chat completions backend
//!
//! Serves both OpenAI and Groq; Groq exposes the same wire format under its
//! own base URL.

use super::{capability_parameters, input_from_arguments, protocol, BackendRequest, CallingConvention, ReasoningBackend};
use crate::config::ProviderConfig;
use crate::error::EngineError;
use crate::models::{CapabilityCall, CapabilitySpec, ReasoningStep, Role, TranscriptEntry};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error};

const MAX_TOKENS: u32 = 2048;

pub struct OpenAiBackend {
    client: Client,
    label: String,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
    tool_calling: bool,
}

impl OpenAiBackend {
    pub fn new(client: Client, config: &ProviderConfig, api_key: String) -> Self {
        Self {
            client,
            label: config.provider.to_string(),
            base_url: config.base_url().to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            tool_calling: config.tool_calling,
        }
    }

    fn build_body(&self, request: &BackendRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": MAX_TOKENS,
            "messages": build_messages(request),
        });

        if request.convention == CallingConvention::NativeTools && !request.catalog.is_empty() {
            body["tools"] = tools_to_openai(request.catalog);
        }

        body
    }
}

#[async_trait]
impl ReasoningBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn supports(&self, convention: CallingConvention) -> bool {
        match convention {
            CallingConvention::NativeTools => self.tool_calling,
            CallingConvention::TextProtocol => true,
        }
    }

    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ReasoningStep> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(
            provider = %self.label,
            transcript_len = request.transcript.len(),
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("{} request failed: {}", self.label, e);
                EngineError::Backend(format!("{} request failed: {}", self.label, e))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            EngineError::Backend(format!("failed to read {} response body: {}", self.label, e))
        })?;

        if !status.is_success() {
            error!("{} API error response: {}", self.label, text);
            return Err(EngineError::Backend(format!(
                "{} API returned {}: {}",
                self.label, status, text
            )));
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| {
            EngineError::BackendProtocol(format!("invalid JSON response: {}", e))
        })?;

        parse_response(&v, request.convention)
    }
}

/// Convert the request into the chat completions `messages` array.
///
/// Native mode replays each exchange as an assistant `tool_calls` message
/// followed by a `tool` message; text mode replays them as plain turns.
fn build_messages(request: &BackendRequest<'_>) -> Vec<Value> {
    let mut system = request.system_prompt.to_string();
    if request.convention == CallingConvention::TextProtocol {
        system.push_str("\n\n");
        system.push_str(&protocol::render_instructions(request.catalog));
    }

    let mut messages = Vec::with_capacity(2 + request.history.len() + 2 * request.transcript.len());
    messages.push(json!({ "role": "system", "content": system }));

    for turn in request.history {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        messages.push(json!({ "role": role, "content": turn.content }));
    }

    messages.push(json!({ "role": "user", "content": request.query }));

    for (index, entry) in request.transcript.iter().enumerate() {
        match (request.convention, entry) {
            (CallingConvention::NativeTools, TranscriptEntry::Exchange { call, observation }) => {
                let call_id = call
                    .call_id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", index));
                let mut assistant = json!({
                    "role": "assistant",
                    "tool_calls": [{
                        "id": call_id,
                        "type": "function",
                        "function": {
                            "name": call.capability_name,
                            "arguments": json!({ "input": call.capability_input }).to_string(),
                        }
                    }],
                });
                if let Some(thought) = &call.thought {
                    assistant["content"] = json!(thought);
                }
                messages.push(assistant);
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": observation.content,
                }));
            }
            (CallingConvention::TextProtocol, TranscriptEntry::Exchange { call, .. }) => {
                messages.push(json!({
                    "role": "assistant",
                    "content": protocol::render_call(call),
                }));
                messages.push(json!({
                    "role": "user",
                    "content": protocol::render_feedback(entry),
                }));
            }
            (_, TranscriptEntry::Correction { .. }) => {
                messages.push(json!({
                    "role": "user",
                    "content": protocol::render_feedback(entry),
                }));
            }
        }
    }

    messages
}

/// OpenAI wraps each tool in `{"type": "function", "function": {...}}`.
fn tools_to_openai(catalog: &[CapabilitySpec]) -> Value {
    let tools: Vec<Value> = catalog
        .iter()
        .map(|spec| {
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": capability_parameters(spec),
                }
            })
        })
        .collect();
    json!(tools)
}

fn parse_response(v: &Value, convention: CallingConvention) -> Result<ReasoningStep> {
    let message = &v["choices"][0]["message"];

    if message.is_null() {
        return Err(EngineError::BackendProtocol(
            "missing `choices[0].message` in response".to_string(),
        ));
    }

    let content = message["content"].as_str().unwrap_or_default().trim();

    // Only the first call is honoured; the loop dispatches one capability per step.
    if let Some(first) = message["tool_calls"].as_array().and_then(|calls| calls.first()) {
        let func = &first["function"];
        let name = func["name"].as_str().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(EngineError::BackendProtocol(
                "tool call without a function name".to_string(),
            ));
        }

        let args_str = func["arguments"].as_str().unwrap_or("{}");
        let arguments: Value = serde_json::from_str(args_str).map_err(|e| {
            EngineError::BackendProtocol(format!(
                "invalid JSON in tool call `{}` arguments: {}",
                name, e
            ))
        })?;

        return Ok(ReasoningStep::CapabilityCall(CapabilityCall {
            capability_name: name,
            capability_input: input_from_arguments(&arguments),
            call_id: first["id"].as_str().map(str::to_string),
            thought: (!content.is_empty()).then(|| content.to_string()),
        }));
    }

    match convention {
        CallingConvention::TextProtocol => protocol::parse_reply(content),
        CallingConvention::NativeTools if content.is_empty() => Err(EngineError::BackendProtocol(
            "response has neither content nor tool calls".to_string(),
        )),
        CallingConvention::NativeTools => Ok(ReasoningStep::FinalAnswer(content.to_string())),
    }
}
