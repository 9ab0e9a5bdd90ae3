//! OpenAI-compatible chat completions provider
//!
//! Works against any endpoint that speaks the `/chat/completions` dialect
//! with function tools (OpenAI, OpenRouter, vLLM, Ollama, DeepSeek, ...).

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ModelConfig;
use crate::reasoning::conversation::Transcript;
use crate::reasoning::inference::*;

pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Provider(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
        })
    }

    /// Build from configuration. The key is taken from `api_key`, falling
    /// back to the environment variable named by `api_key_env`.
    pub fn from_config(config: &ModelConfig, timeout: Duration) -> Result<Self, InferenceError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "No API key configured for {} ({} unset); sending unauthenticated requests",
                config.base_url,
                config.api_key_env
            );
        }
        Self::new(&config.base_url, api_key, &config.model, timeout)
    }
}

/// Build the request body for an OpenAI-compatible chat completion.
pub(crate) fn build_chat_body(
    transcript: &Transcript,
    options: &InferenceOptions,
    model: &str,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": transcript.to_chat_messages(),
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
    });

    if !options.tool_definitions.is_empty() {
        let tools: Vec<serde_json::Value> = options
            .tool_definitions
            .iter()
            .map(|td| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": td.name,
                        "description": td.description,
                        "parameters": td.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

/// Parse an OpenAI-format response body.
pub(crate) fn parse_chat_response(
    resp: &serde_json::Value,
    model: &str,
) -> Result<InferenceResponse, InferenceError> {
    let choice = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| InferenceError::ParseError("No choices in response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| InferenceError::ParseError("No message in choice".into()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    Some(ToolCallRequest {
                        id: tc.get("id")?.as_str()?.to_string(),
                        name: func.get("name")?.as_str()?.to_string(),
                        arguments: func
                            .get("arguments")
                            .and_then(|a| a.as_str())
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let finish_reason = match choice.get("finish_reason").and_then(|f| f.as_str()) {
        Some("length") => FinishReason::MaxTokens,
        Some("content_filter") => FinishReason::ContentFilter,
        _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    };

    let token_count = |u: &serde_json::Value, key: &str| {
        u.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32
    };
    let usage = resp
        .get("usage")
        .map(|u| Usage {
            prompt_tokens: token_count(u, "prompt_tokens"),
            completion_tokens: token_count(u, "completion_tokens"),
            total_tokens: token_count(u, "total_tokens"),
        })
        .unwrap_or_default();

    Ok(InferenceResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
        model: resp
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string(),
    })
}

#[async_trait]
impl InferenceProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        transcript: &Transcript,
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let body = build_chat_body(transcript, options, model);
        let url = format!("{}/chat/completions", self.base_url);

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(model, url = %url, messages = transcript.len(), "Sending chat completion");

        let start = std::time::Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout)
            } else {
                InferenceError::Provider(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(InferenceError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }
        if status.as_u16() == 404 {
            return Err(InferenceError::ModelUnavailable(model.to_string()));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(InferenceError::Provider(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::ParseError(format!("JSON parse error: {}", e)))?;

        tracing::debug!(latency = ?start.elapsed(), "Chat completion finished");
        parse_chat_response(&resp_json, model)
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
