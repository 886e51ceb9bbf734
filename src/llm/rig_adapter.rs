//! Adapter from rig's `CompletionModel` to bizdiag completion requests.
//!
//! rig owns the HTTP transport and wire format. This module only translates
//! requests and responses, and turns rig errors into `LlmError` variants the
//! retry layer can judge.

use std::time::Duration;

use rig::completion::{CompletionError, CompletionModel};
use rig::message::{AssistantContent, Message};
use rig::providers::openai;
use serde_json::Value;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, Role};

/// Raw provider responses that say why generation stopped.
pub trait StopReason {
    fn stop_reason(&self) -> Option<&str>;
}

impl StopReason for openai::completion::CompletionResponse {
    fn stop_reason(&self) -> Option<&str> {
        self.choices.first().map(|c| c.finish_reason.as_str())
    }
}

/// Runs completions through any rig model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
    request_timeout: Duration,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel,
    M::Response: StopReason,
{
    pub fn new(
        model: M,
        model_name: impl Into<String>,
        provider: &'static str,
        request_timeout: Duration,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            provider,
            request_timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// One completion call. System messages become the preamble and the last
    /// chat message becomes the prompt.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut preamble = Vec::new();
        let mut history = Vec::new();
        for message in request.messages {
            match message.role {
                Role::System => preamble.push(message.content),
                Role::User => history.push(Message::user(message.content)),
                Role::Assistant => history.push(Message::assistant(message.content)),
            }
        }
        let prompt = history.pop().ok_or_else(|| LlmError::Rejected {
            provider: self.provider.to_string(),
            reason: "completion request has no chat message".to_string(),
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if !preamble.is_empty() {
            builder = builder.preamble(preamble.join("\n\n"));
        }
        if let Some(t) = request.temperature {
            builder = builder.temperature(f64::from(t));
        }
        if let Some(max) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max));
        }
        if request.json_output {
            builder = builder
                .additional_params(serde_json::json!({"response_format": {"type": "json_object"}}));
        }

        let response = tokio::time::timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: format!("timed out after {:?}", self.request_timeout),
            })?
            .map_err(|e| completion_error(self.provider, e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        let input_tokens = saturating_u32(response.usage.input_tokens);
        let output_tokens = saturating_u32(response.usage.output_tokens);

        debug!(
            model = %self.model_name,
            input_tokens,
            output_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::from_api(response.raw_response.stop_reason()),
        })
    }
}

fn saturating_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn completion_error(provider: &str, e: CompletionError) -> LlmError {
    match e {
        CompletionError::ProviderError(body) => provider_error(provider, &body),
        CompletionError::JsonError(e) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: format!("undecodable completion body: {e}"),
        },
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        other => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}

fn str_field<'a>(error: Option<&'a Value>, name: &str) -> &'a str {
    error
        .and_then(|e| e.get(name))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Classify an error reported by the service.
///
/// rig hands over the error body without the HTTP status, so the OpenAI error
/// envelope (`{"error": {"type", "code", "message"}}`) decides. Bodies that are
/// not an envelope come from proxies and gateways and count as server errors.
pub(crate) fn provider_error(provider: &str, body: &str) -> LlmError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let kind = str_field(error, "type");
    let code = str_field(error, "code");
    let message = match str_field(error, "message") {
        "" => body,
        m => m,
    };
    let reason: String = message.chars().take(500).collect();
    let lower = message.to_lowercase();
    let provider = provider.to_string();

    if code == "invalid_api_key"
        || kind == "authentication_error"
        || kind == "permission_error"
        || lower.contains("incorrect api key")
    {
        LlmError::AuthFailed { provider }
    } else if code == "insufficient_quota" || kind == "insufficient_quota" {
        LlmError::Rejected { provider, reason }
    } else if code == "rate_limit_exceeded"
        || kind == "rate_limit_error"
        || lower.contains("rate limit")
    {
        LlmError::RateLimited {
            provider,
            retry_after: None,
        }
    } else if kind == "server_error" || error.is_none() {
        LlmError::ServerError { provider, reason }
    } else {
        LlmError::Rejected { provider, reason }
    }
}
