//! Ingestor: turns one raw text or voice input into at most one record.
//!
//! Flow:
//! 1. Trim and reject empty input (no service call)
//! 2. Voice only: transcribe, stop on an empty transcript
//! 3. Classify (retries live inside the classification port)
//! 4. Write exactly one record

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::classify::{Classifier, truncate_chars};
use crate::pipeline::types::IngestOutcome;
use crate::store::{NewRecord, RecordStore, Source};

/// Characters of message text included in log lines.
const LOG_PREVIEW_CHARS: usize = 60;

/// Ingestion pipeline.
pub struct Ingestor {
    classifier: Arc<Classifier>,
    store: Arc<dyn RecordStore>,
}

impl Ingestor {
    pub fn new(classifier: Arc<Classifier>, store: Arc<dyn RecordStore>) -> Self {
        Self { classifier, store }
    }

    /// Ingest a text message.
    pub async fn ingest_text(&self, user_id: i64, chat_id: i64, text: &str) -> IngestOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!(user_id, chat_id, "Empty text, skipping");
            return IngestOutcome::EmptyInputSkipped;
        }
        self.classify_and_store(user_id, chat_id, Source::Text, text)
            .await
    }

    /// Ingest a voice note: transcribe, then follow the text path.
    pub async fn ingest_voice(&self, user_id: i64, chat_id: i64, audio: &[u8]) -> IngestOutcome {
        if audio.is_empty() {
            debug!(user_id, chat_id, "Empty audio, skipping");
            return IngestOutcome::EmptyInputSkipped;
        }

        let transcript = match self.classifier.transcribe(audio).await {
            Ok(t) => t,
            Err(e) => {
                warn!(user_id, chat_id, error = %e, "Transcription unavailable");
                return IngestOutcome::ClassificationFailed;
            }
        };

        let transcript = transcript.trim();
        if transcript.is_empty() {
            info!(user_id, chat_id, audio_bytes = audio.len(), "Voice note had no speech");
            return IngestOutcome::TranscriptionEmpty;
        }

        self.classify_and_store(user_id, chat_id, Source::Voice, transcript)
            .await
    }

    async fn classify_and_store(
        &self,
        user_id: i64,
        chat_id: i64,
        source: Source,
        text: &str,
    ) -> IngestOutcome {
        let classification = match self.classifier.classify(text).await {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id, chat_id, %source, error = %e, "Classification unavailable");
                return IngestOutcome::ClassificationFailed;
            }
        };

        let record = NewRecord::new(user_id, chat_id, source, text, classification);
        match self.store.save(record).await {
            Ok(saved) => {
                info!(
                    record_id = saved.id,
                    user_id,
                    %source,
                    category = %saved.category,
                    urgency = %saved.urgency,
                    "Message ingested"
                );
                IngestOutcome::Persisted(saved)
            }
            Err(e) => {
                error!(
                    user_id,
                    chat_id,
                    %source,
                    preview = %truncate_chars(text, LOG_PREVIEW_CHARS),
                    error = %e,
                    "Store unavailable, classification discarded"
                );
                IngestOutcome::StoreFailed
            }
        }
    }
}
