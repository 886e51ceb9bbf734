//! Shared types for the ingestion pipeline.

use crate::store::Record;

/// Result of ingesting one raw input unit.
///
/// Ingestion never returns an error: every failure mode is a variant here so
/// the transport can acknowledge the message either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Classified and written.
    Persisted(Record),
    /// Input was empty after trimming. Nothing was called or written.
    EmptyInputSkipped,
    /// The voice note transcribed to nothing.
    TranscriptionEmpty,
    /// The NLP service stayed unreachable through the retry budget.
    ClassificationFailed,
    /// Classification succeeded but the write failed; the result was dropped.
    StoreFailed,
}

impl IngestOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted(_) => "persisted",
            Self::EmptyInputSkipped => "empty_input_skipped",
            Self::TranscriptionEmpty => "transcription_empty",
            Self::ClassificationFailed => "classification_failed",
            Self::StoreFailed => "store_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ClassificationFailed | Self::StoreFailed)
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Persisted(record) => Some(record),
            _ => None,
        }
    }
}
