//! OpenAI-compatible chat provider
//!
//! Works with OpenAI, Azure OpenAI, vLLM, Ollama, and other endpoints that
//! speak `/chat/completions`.

use super::*;
use crate::{Error, ErrorKind, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                Error::new(ErrorKind::ConfigInvalid, "failed to build HTTP client")
                    .with_operation("openai::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let api_request = ApiRequest {
            model: model.clone(),
            messages: request.messages.into_iter().map(ApiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|t| ApiTool {
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: t.name,
                            description: Some(t.description),
                            parameters: Some(t.parameters),
                        },
                    })
                    .collect()
            }),
            stop: request.stop,
        };

        let mut req = self.client.post(self.endpoint()).json(&api_request);

        if let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(api_key);
        }
        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::NetworkFailed
            };
            Error::new(kind, "request to chat endpoint failed")
                .with_operation("openai::complete")
                .with_context("model", model.clone())
                .set_source(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body).with_context("model", model));
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            Error::malformed_response("chat endpoint returned an undecodable body")
                .with_operation("openai::complete")
                .set_source(e)
        })?;

        let choice = api_response.choices.into_iter().next().ok_or_else(|| {
            Error::malformed_response("no choices in response").with_operation("openai::complete")
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let usage = api_response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content,
            tool_calls,
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
            usage,
        })
    }
}

/// Map a non-success HTTP status onto the error taxonomy
fn status_error(status: StatusCode, body: String) -> Error {
    let err = match status {
        StatusCode::TOO_MANY_REQUESTS => Error::new(ErrorKind::RateLimited, body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Error::new(ErrorKind::Timeout, body)
        }
        s if s.is_server_error() => Error::external_failure(body).temporary(),
        _ => Error::external_failure(body).permanent(),
    };
    err.with_operation("openai::complete")
        .with_context("status", status.as_u16().to_string())
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<ChatMessage> for ApiMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().into(),
            content: msg.content,
            tool_calls: msg.tool_calls.map(|tcs| {
                tcs.into_iter()
                    .map(|tc| ApiToolCall {
                        id: tc.id,
                        r#type: "function".into(),
                        function: ApiFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiTool {
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());

        let err = status_error(StatusCode::BAD_GATEWAY, "upstream".into());
        assert_eq!(err.kind(), ErrorKind::ExternalFailure);
        assert!(err.is_retryable());

        let err = status_error(StatusCode::UNAUTHORIZED, "bad key".into());
        assert_eq!(err.kind(), ErrorKind::ExternalFailure);
        assert!(!err.is_retryable());
        assert_eq!(err.context_value("status"), Some("401"));
    }

    #[test]
    fn test_message_conversion() {
        let mut msg = ChatMessage::assistant("");
        msg.tool_calls = Some(vec![ToolCall {
            id: "call_9".into(),
            name: "grep".into(),
            arguments: "{}".into(),
        }]);
        let api = ApiMessage::from(msg);
        assert_eq!(api.role, "assistant");
        let calls = api.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "grep");
        assert_eq!(calls[0].r#type, "function");
    }

    #[test]
    fn test_response_decoding() {
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "message": {"role": "assistant", "content": "{\"action\":\"complete\"}"},
                "finish_reason": "stop"
            }]
        });
        let parsed: ApiResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let provider =
            OpenAiProvider::new(ProviderConfig::compatible("http://localhost:8000/v1/", "m"))
                .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:8000/v1/chat/completions");
    }
}
