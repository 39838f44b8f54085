use crate::error::EngineError;
use crate::Result;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Pooled client shared by every capability that talks to a public data source.
pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| EngineError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Send the request and decode a JSON body. `None` when the upstream answers
/// with a non-success status.
pub(crate) async fn fetch_json(request: RequestBuilder) -> Result<Option<Value>> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Ok(None);
    }
    Ok(Some(response.json().await?))
}
