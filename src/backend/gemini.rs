//! Gemini generateContent backend
//!
//! Native mode declares every capability as a function; text mode sends plain
//! turns and parses the reply with the text action protocol.

use super::{capability_parameters, input_from_arguments, protocol, BackendRequest, CallingConvention, ReasoningBackend};
use crate::config::ProviderConfig;
use crate::error::EngineError;
use crate::models::{CapabilityCall, ReasoningStep, Role, TranscriptEntry};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

pub struct GeminiBackend {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
    tool_calling: bool,
}

impl GeminiBackend {
    pub fn new(client: Client, config: &ProviderConfig, api_key: String) -> Self {
        Self {
            client,
            base_url: config.base_url().to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            tool_calling: config.tool_calling,
        }
    }

    fn build_request(&self, request: &BackendRequest<'_>) -> GeminiRequest {
        let mut system = request.system_prompt.to_string();
        let native = request.convention == CallingConvention::NativeTools;

        if !native {
            system.push_str("\n\n");
            system.push_str(&protocol::render_instructions(request.catalog));
        }

        let tools = if native && !request.catalog.is_empty() {
            vec![ToolDeclaration {
                function_declarations: request
                    .catalog
                    .iter()
                    .map(|spec| FunctionDeclaration {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        parameters: capability_parameters(spec),
                    })
                    .collect(),
            }]
        } else {
            Vec::new()
        };

        GeminiRequest {
            contents: build_contents(request),
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
            },
            system_instruction: Content::text(None, system),
            tools,
        }
    }
}

#[async_trait]
impl ReasoningBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn supports(&self, convention: CallingConvention) -> bool {
        match convention {
            CallingConvention::NativeTools => self.tool_calling,
            CallingConvention::TextProtocol => true,
        }
    }

    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ReasoningStep> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = self.build_request(&request);

        debug!(
            model = %self.model,
            transcript_len = request.transcript.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors carry the URL, which carries the key
                let e = e.without_url();
                error!("Gemini API request failed: {}", e);
                EngineError::Backend(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(EngineError::Backend(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse Gemini response: {}", e);
            EngineError::BackendProtocol(format!("Gemini parse error: {}", e))
        })?;

        parse_response(gemini_response, request.convention)
    }
}

fn build_contents(request: &BackendRequest<'_>) -> Vec<Content> {
    let mut contents = Vec::with_capacity(1 + request.history.len() + 2 * request.transcript.len());

    for turn in request.history {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        contents.push(Content::text(Some(role), turn.content.clone()));
    }

    contents.push(Content::text(Some("user"), request.query.to_string()));

    for entry in request.transcript {
        match (request.convention, entry) {
            (CallingConvention::NativeTools, TranscriptEntry::Exchange { call, observation }) => {
                contents.push(Content {
                    role: Some("model".to_string()),
                    parts: vec![Part {
                        function_call: Some(FunctionCall {
                            name: call.capability_name.clone(),
                            args: serde_json::json!({ "input": call.capability_input }),
                        }),
                        ..Part::default()
                    }],
                });
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part {
                        function_response: Some(FunctionResponse {
                            name: call.capability_name.clone(),
                            response: serde_json::json!({ "content": observation.content }),
                        }),
                        ..Part::default()
                    }],
                });
            }
            (CallingConvention::TextProtocol, TranscriptEntry::Exchange { call, .. }) => {
                contents.push(Content::text(Some("model"), protocol::render_call(call)));
                contents.push(Content::text(Some("user"), protocol::render_feedback(entry)));
            }
            (_, TranscriptEntry::Correction { .. }) => {
                contents.push(Content::text(Some("user"), protocol::render_feedback(entry)));
            }
        }
    }

    contents
}

fn parse_response(response: GeminiResponse, convention: CallingConvention) -> Result<ReasoningStep> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        EngineError::BackendProtocol("No candidates in Gemini response".to_string())
    })?;

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    let text: String = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();

    if let Some(call) = parts.iter().find_map(|p| p.function_call.as_ref()) {
        return Ok(ReasoningStep::CapabilityCall(CapabilityCall {
            capability_name: call.name.clone(),
            capability_input: input_from_arguments(&call.args),
            call_id: None,
            thought: (!text.is_empty()).then(|| text.to_string()),
        }));
    }

    if text.is_empty() {
        return Err(EngineError::BackendProtocol(format!(
            "Empty response from Gemini (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    match convention {
        CallingConvention::TextProtocol => protocol::parse_reply(text),
        CallingConvention::NativeTools => Ok(ReasoningStep::FinalAnswer(text.to_string())),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: String) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text),
                ..Part::default()
            }],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclaration {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}
