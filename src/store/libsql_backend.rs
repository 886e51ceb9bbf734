//! libSQL implementation of `RecordStore`.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::classify::{Category, Sentiment, Urgency};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{NewRecord, Record, RecordStore, Source};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    // Held so the database outlives `conn`; never read.
    _db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            _db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            _db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Insert a record with an explicit timestamp.
    ///
    /// `save` calls this with the current time; imports and tests use it to
    /// place records at a known point in the past.
    pub async fn save_at(
        &self,
        record: NewRecord,
        created_at: DateTime<Utc>,
    ) -> Result<Record, DatabaseError> {
        if record.raw_text.trim().is_empty() {
            return Err(DatabaseError::Constraint(
                "raw_text must not be empty".to_string(),
            ));
        }

        let created_at = truncate_to_micros(created_at);
        let mut rows = self
            .conn
            .query(
                "INSERT INTO records (created_at, user_id, chat_id, source, raw_text, normalized_text, category, topic, urgency, sentiment, delegate_candidate, automate_candidate, hire_candidate, summary) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) RETURNING id",
                params![
                    format_timestamp(created_at),
                    record.user_id,
                    record.chat_id,
                    record.source.as_str(),
                    record.raw_text.as_str(),
                    record.normalized_text.as_str(),
                    record.category.as_str(),
                    record.topic.as_str(),
                    record.urgency.as_str(),
                    record.sentiment.as_str(),
                    i64::from(record.delegate_candidate),
                    i64::from(record.automate_candidate),
                    i64::from(record.hire_candidate),
                    record.summary.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save: {e}")))?;

        let id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("save row parse: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "save: insert returned no id".to_string(),
                ));
            }
            Err(e) => return Err(DatabaseError::Query(format!("save: {e}"))),
        };

        debug!(
            record_id = id,
            category = %record.category,
            urgency = %record.urgency,
            "Record saved"
        );
        Ok(Record::from_new(id, created_at, record))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 with microseconds, so text order equals time order.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn truncate_to_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

const RECORD_COLUMNS: &str = "id, created_at, user_id, chat_id, source, raw_text, normalized_text, category, topic, urgency, sentiment, delegate_candidate, automate_candidate, hire_candidate, summary";

fn row_to_record(row: &libsql::Row) -> Result<Record, libsql::Error> {
    let created_str: String = row.get(1)?;
    let source_str: String = row.get(4)?;
    let category_str: String = row.get(7)?;
    let urgency_str: String = row.get(9)?;
    let sentiment_str: String = row.get(10)?;

    Ok(Record {
        id: row.get(0)?,
        created_at: parse_datetime(&created_str),
        user_id: row.get(2)?,
        chat_id: row.get(3)?,
        source: source_str.parse().unwrap_or(Source::Text),
        raw_text: row.get(5)?,
        normalized_text: row.get(6)?,
        category: Category::parse_lenient(&category_str),
        topic: row.get(8)?,
        urgency: urgency_str.parse::<Urgency>().unwrap_or_default(),
        sentiment: sentiment_str.parse::<Sentiment>().unwrap_or_default(),
        delegate_candidate: row.get::<i64>(11)? != 0,
        automate_candidate: row.get::<i64>(12)? != 0,
        hire_candidate: row.get::<i64>(13)? != 0,
        summary: row.get(14)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    async fn save(&self, record: NewRecord) -> Result<Record, DatabaseError> {
        self.save_at(record, Utc::now()).await
    }

    async fn query_window(&self, since: DateTime<Utc>) -> Result<Vec<Record>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE created_at >= ?1 ORDER BY created_at ASC, id ASC"
                ),
                params![format_timestamp(since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("query_window: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => records.push(
                    row_to_record(&row)
                        .map_err(|e| DatabaseError::Query(format!("query_window row parse: {e}")))?,
                ),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("query_window: {e}"))),
            }
        }
        debug!(since = %since, count = records.len(), "Window queried");
        Ok(records)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM records WHERE created_at >= ?1",
                params![format_timestamp(since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_since: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_since row parse: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_since: {e}"))),
        }
    }
}
