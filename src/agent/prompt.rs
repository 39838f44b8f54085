//! System prompt for the analyst

use chrono::Utc;
use serde_json::Value;

const ANALYST_PROMPT: &str = r#"You are an expert financial analyst covering crypto and traditional markets.

Use the available tools to gather current information before answering. Prefer
fresh data from the tools over prior knowledge, and say so when a tool could not
provide what you needed.

Structure the final report with these sections:
1. Macro context: economic calendar events and policy backdrop
2. Market data: price action and relevant levels
3. Funding and open interest: derivatives positioning
4. News and events: what moved or may move the market
5. Sentiment: overall market mood
6. Risks and opportunities
7. Operational conclusion: a clear, actionable summary

Be precise with numbers and name where each figure came from. Answer in the
language of the user's question."#;

/// Full system prompt for one query, with the caller's context appended.
pub fn system_prompt(context: Option<&Value>) -> String {
    let mut prompt = format!(
        "{}\n\nToday's date: {}",
        ANALYST_PROMPT,
        Utc::now().format("%Y-%m-%d")
    );

    if let Some(rendered) = context.and_then(render_context) {
        prompt.push_str("\n\nAdditional context from the user:\n");
        prompt.push_str(&rendered);
    }

    prompt
}

/// `None` for null or empty context.
fn render_context(context: &Value) -> Option<String> {
    match context {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Object(map) => Some(
            map.iter()
                .map(|(key, value)| match value {
                    Value::String(s) => format!("- {}: {}", key, s),
                    other => format!("- {}: {}", key, other),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
