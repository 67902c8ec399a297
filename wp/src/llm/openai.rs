//! OpenAI-compatible Chat Completions client
//!
//! Works against any endpoint speaking the Chat Completions protocol
//! (OpenAI, Gemini's OpenAI endpoint, local servers).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StopReason, TokenUsage};
use crate::config::LlmConfig;

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 1000;

/// OpenAI-compatible API client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl OpenAIClient {
    /// Create a client from configuration, reading the API key from the environment
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "from_config: called");
        let api_key = config.api_key().map_err(|e| LlmError::Config(e.to_string()))?;
        Self::new(&config.model, api_key, &config.base_url, config.max_tokens, config.timeout())
    }

    pub fn new(
        model: &str,
        api_key: impl Into<String>,
        base_url: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;
        Ok(Self {
            model: model.to_string(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens,
        })
    }

    /// Build the request body for the Chat Completions API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(request.messages.iter().map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.min(self.max_tokens),
        });
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }

    /// Parse the API response
    fn parse_response(&self, api_response: OpenAIResponse) -> CompletionResponse {
        debug!(choices = api_response.choices.len(), "parse_response: called");
        let (content, stop_reason) = match api_response.choices.into_iter().next() {
            Some(c) => {
                let stop_reason = match c.finish_reason.as_deref() {
                    Some("length") => StopReason::MaxTokens,
                    Some("content_filter") => StopReason::ContentFilter,
                    _ => StopReason::EndTurn,
                };
                (c.message.content, stop_reason)
            }
            None => (None, StopReason::EndTurn),
        };
        let usage = api_response.usage.unwrap_or_default();

        CompletionResponse {
            content,
            stop_reason,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "complete: called");
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff, "complete: retrying after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let response = match self
                .http
                .post(url.clone())
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "complete: network error");
                    last_error = Some(LlmError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 429 {
                debug!("complete: rate limited (429)");
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);

                return Err(LlmError::RateLimited {
                    retry_after: Duration::from_secs(retry_after),
                });
            }

            let text = response.text().await?;

            if !(200..300).contains(&status) {
                let err = LlmError::ApiError { status, message: text };
                if err.is_retryable() && attempt < MAX_RETRIES {
                    debug!(attempt, status, "complete: retryable error");
                    last_error = Some(err);
                    continue;
                }
                debug!(%status, "complete: API error");
                return Err(err);
            }

            debug!("complete: success");
            return decode_response(&text).map(|r| self.parse_response(r));
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("Max retries exceeded".to_string())))
    }
}

fn decode_response(body: &str) -> Result<OpenAIResponse, LlmError> {
    Ok(serde_json::from_str(body)?)
}

// Chat Completions response types

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn client(max_tokens: u32) -> OpenAIClient {
        OpenAIClient::new(
            "gemini-2.5-flash",
            "test-key",
            "https://example.test/v1beta/openai/",
            max_tokens,
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_build_request_body_basic() {
        let request = CompletionRequest {
            system_prompt: "Extract trip details".to_string(),
            messages: vec![Message::user("Tokyo next month")],
            max_tokens: 500,
            json_mode: false,
        };

        let body = client(8192).build_request_body(&request);

        assert_eq!(body["model"], "gemini-2.5-flash");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "Extract trip details");
        assert_eq!(body["messages"][1]["role"], "user");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_max_tokens_capped_and_json_mode() {
        let request = CompletionRequest {
            system_prompt: "Test".to_string(),
            messages: vec![],
            max_tokens: 5000,
            json_mode: true,
        };

        let body = client(1000).build_request_body(&request);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client(10).base_url, "https://example.test/v1beta/openai");
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "{\"destination\": \"Paris\"}"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 40, "completion_tokens": 12, "total_tokens": 52}
        }"#;
        let api_response: OpenAIResponse = serde_json::from_str(raw).unwrap();

        let response = client(10).parse_response(api_response);

        assert_eq!(response.content.as_deref(), Some("{\"destination\": \"Paris\"}"));
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
        assert_eq!(response.usage.total(), 52);
    }

    #[test]
    fn test_parse_response_without_usage() {
        let api_response: OpenAIResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let response = client(10).parse_response(api_response);
        assert!(response.content.is_none());
        assert_eq!(response.usage, TokenUsage::default());
    }

    #[test]
    fn test_decode_non_json_body() {
        let err = decode_response("<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, LlmError::Json(_)));
        assert!(decode_response(r#"{"choices": []}"#).is_ok());
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = LlmConfig {
            api_key_env: "WAYPOINT_OPENAI_TEST_UNSET".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(OpenAIClient::from_config(&config), Err(LlmError::Config(_))));
    }
}
