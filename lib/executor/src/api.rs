//! API invocation: sends the instructions as a single message to a remote
//! text-generation endpoint and takes the first text block as output.

use crate::error::ExecutionError;
use serde::Deserialize;
use std::time::Duration;
use taskward_core::config::ApiConfig;

/// Reads the API key from the configured environment variable.
///
/// # Errors
///
/// Returns `CredentialMissing` if the variable is unset or blank.
pub fn api_key_from_env(variable: &str) -> Result<String, ExecutionError> {
    std::env::var(variable)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ExecutionError::CredentialMissing {
            variable: variable.to_string(),
        })
}

/// Builds the request body for one instruction set.
#[must_use]
pub fn build_request(config: &ApiConfig, instructions: &str) -> serde_json::Value {
    serde_json::json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "messages": [
            { "role": "user", "content": instructions }
        ],
    })
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Extracts the first text block from a response body.
///
/// # Errors
///
/// Returns `ResponseParseFailed` if the body is not a messages response or
/// carries no text block.
pub fn first_text_block(body: &str) -> Result<String, ExecutionError> {
    let response: MessagesResponse =
        serde_json::from_str(body).map_err(|e| ExecutionError::ResponseParseFailed {
            reason: e.to_string(),
        })?;
    response
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .ok_or_else(|| ExecutionError::ResponseParseFailed {
            reason: "response contains no text block".to_string(),
        })
}

/// Client for the messages endpoint.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    /// Creates a client whose requests give up after `limit`.
    #[must_use]
    pub fn new(config: ApiConfig, limit: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(limit)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { http, config }
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    /// Sends the instructions and returns the generated text.
    ///
    /// # Errors
    ///
    /// Returns `ApiRequestFailed` on transport errors or a non-success
    /// status (with the response body as detail), and
    /// `ResponseParseFailed` if the reply has no text.
    pub async fn complete(
        &self,
        api_key: &str,
        instructions: &str,
    ) -> Result<String, ExecutionError> {
        let response = self
            .http
            .post(self.url())
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.version_header)
            .header("content-type", "application/json")
            .json(&build_request(&self.config, instructions))
            .send()
            .await
            .map_err(|e| ExecutionError::ApiRequestFailed {
                status: None,
                body: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::ApiRequestFailed {
                status: Some(status.as_u16()),
                body: e.to_string(),
            })?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "API request returned error");
            return Err(ExecutionError::ApiRequestFailed {
                status: Some(status.as_u16()),
                body,
            });
        }
        first_text_block(&body)
    }
}
