//! Ingestion pipeline.
//!
//! Every inbound text or voice message flows through:
//! 1. `Ingestor::ingest_text` / `Ingestor::ingest_voice`: trim, transcribe
//! 2. `Classifier::classify`: NLP call with retries and defaulting
//! 3. `RecordStore::save`: one append-only write
//!
//! Failures become `IngestOutcome` variants, never errors.

pub mod ingest;
pub mod types;

pub use ingest::Ingestor;
pub use types::IngestOutcome;
