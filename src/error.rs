//! Error types for bizdiag.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors. Any of these surfaces as "store unavailable".
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to download file on channel {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Transport-level errors from the NLP provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned a server error: {reason}")]
    ServerError { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Network failures, timeouts, rate limiting and 5xx responses are
    /// transient. Authentication failures and malformed requests are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. }
                | Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::InvalidResponse { .. }
        )
    }
}

/// Errors raised by the classification port.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The service answered, but the payload does not parse into a classification.
    #[error("Classification format error: {0}")]
    Format(String),

    /// A single provider call failed. Retried according to the provider error.
    #[error("Provider call failed: {0}")]
    Provider(#[from] LlmError),

    /// The service could not be reached within the retry budget.
    #[error("Classification unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: LlmError,
    },
}

impl ClassifyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Format(_) => true,
            Self::Provider(e) => e.is_retryable(),
            Self::Unavailable { .. } => false,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
