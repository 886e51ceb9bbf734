//! Classification port.
//!
//! Wraps the NLP provider behind two operations, `classify` and
//! `transcribe`, and owns the retry policy for both. Service output is
//! untrusted: it is parsed into `RawClassification` and normalized so that a
//! partial answer never blocks persistence.

pub mod model;

pub use model::{Category, Classification, RawClassification, Sentiment, Urgency};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ClassifyError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, RetryPolicy, TranscriptionRequest, retry,
};

/// Default prefix length (in characters) sent to the service.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8000;

const CLASSIFY_TEMPERATURE: f32 = 0.2;

const CLASSIFY_MAX_TOKENS: u32 = 700;

/// Knobs for the classification port.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub max_input_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            retry: RetryPolicy::default(),
        }
    }
}

/// The classification port.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ClassifierConfig) -> Self {
        Self { llm, config }
    }

    /// Classify one message.
    ///
    /// Transport failures are retried per the policy and end in
    /// `ClassifyError::Unavailable`. A payload that still cannot be parsed
    /// after the last attempt is replaced by an all-defaults classification.
    pub async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        let input = truncate_chars(text, self.config.max_input_chars);
        let request = CompletionRequest::new(vec![
            ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT),
            ChatMessage::user(input),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS)
        .with_json_output();

        let result = retry(
            &self.config.retry,
            "classify",
            ClassifyError::is_retryable,
            || {
                let request = request.clone();
                async move {
                    let response = self.llm.complete(request).await?;
                    parse_classification(&response.content).inspect_err(|e| {
                        debug!(
                            raw_response = %preview(&response.content, 300),
                            error = %e,
                            "Unparseable classification payload"
                        );
                    })
                }
            },
        )
        .await;

        match result {
            Ok(classification) => {
                info!(
                    category = %classification.category,
                    urgency = %classification.urgency,
                    "Message classified"
                );
                Ok(classification)
            }
            Err(exhausted) => match exhausted.last_error {
                ClassifyError::Format(reason) => {
                    warn!(
                        attempts = exhausted.attempts,
                        reason = %reason,
                        "Classification payload never parsed, using defaults"
                    );
                    Ok(Classification::default())
                }
                ClassifyError::Provider(source) => Err(ClassifyError::Unavailable {
                    attempts: exhausted.attempts,
                    source,
                }),
                other => Err(other),
            },
        }
    }

    /// Transcribe a voice note. An empty string is a valid "no speech" result.
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String, ClassifyError> {
        let result = retry(
            &self.config.retry,
            "transcribe",
            |e: &crate::error::LlmError| e.is_retryable(),
            || {
                let request = TranscriptionRequest::voice_note(audio.to_vec());
                self.llm.transcribe(request)
            },
        )
        .await;

        match result {
            Ok(transcript) => {
                debug!(chars = transcript.chars().count(), "Voice transcribed");
                Ok(transcript)
            }
            Err(exhausted) => Err(ClassifyError::Unavailable {
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            }),
        }
    }
}

/// Instruction contract for the service: JSON only, exactly these keys.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = "You are a business diagnostician. The input is a \
message from a business owner, often messy or dictated.\n\
Return ONLY a valid JSON object with exactly these keys:\n\
{\n\
 \"normalized_text\": \"...\",\n\
 \"category\": \"operations|sales|marketing|finance|hr|service|product|strategy|other\",\n\
 \"topic\": \"... (2-5 words)\",\n\
 \"urgency\": \"low|medium|high\",\n\
 \"sentiment\": \"negative|neutral|positive\",\n\
 \"delegate_candidate\": true|false,\n\
 \"automate_candidate\": true|false,\n\
 \"hire_candidate\": true|false,\n\
 \"summary\": \"1-2 sentence digest\"\n\
}\n\
Rules:\n\
- normalized_text: remove filler, keep the meaning and the original language.\n\
- urgency is high when there is a deadline, a fire, a client about to leave, or money burning.\n\
- delegate_candidate is true when the task is routine, repeatable and does not need the owner.\n\
- automate_candidate is true when the task repeats and can be formalized.\n\
- hire_candidate is true when nobody is available to do it or a steady workload needs a role.\n\
- summary and topic use the same language as the message.";

/// Parse a service reply into a normalized classification.
pub fn parse_classification(raw: &str) -> Result<Classification, ClassifyError> {
    let json = extract_json_object(raw);
    let value: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| ClassifyError::Format(format!("JSON parse error: {e}")))?;
    if !value.is_object() {
        return Err(ClassifyError::Format(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    let raw: RawClassification = serde_json::from_value(value)
        .map_err(|e| ClassifyError::Format(format!("shape error: {e}")))?;
    Ok(raw.normalize())
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// First `max` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn preview(s: &str, max: usize) -> &str {
    truncate_chars(s, max)
}
