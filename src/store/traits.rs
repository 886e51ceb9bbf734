//! `RecordStore` trait and the persisted record types.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{Category, Classification, Sentiment, Urgency};
use crate::error::DatabaseError;

/// How a message arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Text,
    Voice,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "voice" => Ok(Self::Voice),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record ready to be written. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub user_id: i64,
    pub chat_id: i64,
    pub source: Source,
    pub raw_text: String,
    pub normalized_text: String,
    pub category: Category,
    pub topic: String,
    pub urgency: Urgency,
    pub sentiment: Sentiment,
    pub delegate_candidate: bool,
    pub automate_candidate: bool,
    pub hire_candidate: bool,
    pub summary: String,
}

impl NewRecord {
    /// Combine provenance with a classification. An empty `normalized_text`
    /// falls back to the raw text.
    pub fn new(
        user_id: i64,
        chat_id: i64,
        source: Source,
        raw_text: impl Into<String>,
        classification: Classification,
    ) -> Self {
        let raw_text = raw_text.into();
        let normalized_text = if classification.normalized_text.trim().is_empty() {
            raw_text.clone()
        } else {
            classification.normalized_text
        };
        Self {
            user_id,
            chat_id,
            source,
            raw_text,
            normalized_text,
            category: classification.category,
            topic: classification.topic,
            urgency: classification.urgency,
            sentiment: classification.sentiment,
            delegate_candidate: classification.delegate_candidate,
            automate_candidate: classification.automate_candidate,
            hire_candidate: classification.hire_candidate,
            summary: classification.summary,
        }
    }
}

/// A persisted, classified message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: i64,
    pub chat_id: i64,
    pub source: Source,
    pub raw_text: String,
    pub normalized_text: String,
    pub category: Category,
    pub topic: String,
    pub urgency: Urgency,
    pub sentiment: Sentiment,
    pub delegate_candidate: bool,
    pub automate_candidate: bool,
    pub hire_candidate: bool,
    pub summary: String,
}

impl Record {
    pub(crate) fn from_new(id: i64, created_at: DateTime<Utc>, new: NewRecord) -> Self {
        Self {
            id,
            created_at,
            user_id: new.user_id,
            chat_id: new.chat_id,
            source: new.source,
            raw_text: new.raw_text,
            normalized_text: new.normalized_text,
            category: new.category,
            topic: new.topic,
            urgency: new.urgency,
            sentiment: new.sentiment,
            delegate_candidate: new.delegate_candidate,
            automate_candidate: new.automate_candidate,
            hire_candidate: new.hire_candidate,
            summary: new.summary,
        }
    }
}

/// Append-only storage for classified records. Records are never updated
/// or deleted once written.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Persist one record in a single atomic insert.
    async fn save(&self, record: NewRecord) -> Result<Record, DatabaseError>;

    /// All records with `created_at >= since`, oldest first (ties by id).
    async fn query_window(&self, since: DateTime<Utc>) -> Result<Vec<Record>, DatabaseError>;

    /// Number of records with `created_at >= since`.
    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
