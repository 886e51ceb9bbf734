//! OpenAI-compatible provider.
//!
//! Chat completions go through rig's OpenAI client on the Chat Completions
//! API. Transcription posts the audio to `/audio/transcriptions` over reqwest
//! with no `language` field, so the service detects the spoken language
//! itself. Each method performs exactly one request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use rig::client::CompletionClient;
use rig::providers::openai;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, TranscriptionRequest};
use crate::llm::rig_adapter::RigAdapter;

const PROVIDER: &str = "openai";

/// OpenAI chat and transcription client.
pub struct OpenAiProvider {
    chat: RigAdapter<openai::completion::CompletionModel>,
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    transcribe_model: String,
}

impl OpenAiProvider {
    /// Build a provider. `request_timeout` bounds every single attempt.
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        transcribe_model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();

        let client = openai::Client::builder()
            .api_key(api_key.expose_secret())
            .base_url(&base_url)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create OpenAI client: {e}"),
            })?
            .completions_api();
        let chat = RigAdapter::new(
            client.completion_model(&model),
            model,
            PROVIDER,
            request_timeout,
        );

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            chat,
            http,
            api_key,
            base_url,
            transcribe_model: transcribe_model.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    text: String,
}

fn request_error(e: reqwest::Error) -> LlmError {
    let reason = if e.is_timeout() {
        format!("timed out: {e}")
    } else {
        e.to_string()
    };
    LlmError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason,
    }
}

/// Map a non-success transcription status to an error.
fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> LlmError {
    let body: String = body.chars().take(500).collect();
    let reason = format!("HTTP {}: {body}", status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        },
        s if s.is_server_error() => LlmError::ServerError {
            provider: PROVIDER.to_string(),
            reason,
        },
        _ => LlmError::Rejected {
            provider: PROVIDER.to_string(),
            reason,
        },
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        self.chat.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.chat.complete(request).await
    }

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String, LlmError> {
        let size = request.audio.len();
        let part = Part::bytes(request.audio).file_name(request.file_name);
        let form = Form::new()
            .text("model", self.transcribe_model.clone())
            .part("file", part);

        let resp = self
            .http
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, body));
        }

        let parsed: TranscriptionBody =
            resp.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("undecodable transcription body: {e}"),
            })?;

        debug!(
            model = %self.transcribe_model,
            audio_bytes = size,
            transcript_chars = parsed.text.chars().count(),
            "Transcription received"
        );
        Ok(parsed.text)
    }
}
