//! Messages in, reports out: ingestion, the file-backed store and the bot.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;

use bizdiag::bot::Bot;
use bizdiag::channels::{Channel, IncomingMessage, MessageKind, MessageStream};
use bizdiag::classify::{Classification, Classifier, ClassifierConfig, Urgency};
use bizdiag::error::{ChannelError, LlmError};
use bizdiag::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, RetryPolicy,
    TranscriptionRequest,
};
use bizdiag::pipeline::{IngestOutcome, Ingestor};
use bizdiag::reports::Reporter;
use bizdiag::store::{LibSqlBackend, NewRecord, RecordStore, Source};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Classifies by keyword, the way a well-behaved model would.
struct KeywordLlm;

#[async_trait]
impl LlmProvider for KeywordLlm {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let text = request
            .messages
            .last()
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();
        let content = if text.contains("invoice") {
            serde_json::json!({
                "category": "finance",
                "topic": "invoicing",
                "urgency": "medium",
                "automate_candidate": true,
                "summary": "Invoices are typed by hand"
            })
        } else if text.contains("client") {
            serde_json::json!({
                "category": "sales",
                "topic": "client churn",
                "urgency": "high",
                "delegate_candidate": true,
                "summary": "A key client is about to leave"
            })
        } else {
            // Missing fields are filled with defaults.
            serde_json::json!({"topic": "misc"})
        };
        Ok(CompletionResponse {
            content: content.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn transcribe(&self, _request: TranscriptionRequest) -> Result<String, LlmError> {
        Ok("we need a courier, hire one".into())
    }
}

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty::<IncomingMessage>()))
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>, ChannelError> {
        Ok(b"OggS".to_vec())
    }
}

fn ingestor(store: Arc<dyn RecordStore>) -> Ingestor {
    let classifier = Arc::new(Classifier::new(
        Arc::new(KeywordLlm),
        ClassifierConfig {
            retry: RetryPolicy::immediate(1),
            ..Default::default()
        },
    ));
    Ingestor::new(classifier, store)
}

#[tokio::test]
async fn ingested_messages_show_up_in_reports() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("bizdiag.db");
    let store = Arc::new(LibSqlBackend::new_local(&path).await.unwrap());
    let ingestor = ingestor(store.clone());

    let outcomes = [
        ingestor.ingest_text(1, 10, "The client from Monday wants to leave").await,
        ingestor.ingest_text(1, 10, "I type every invoice by hand").await,
        ingestor.ingest_text(1, 10, "   ").await,
        ingestor.ingest_voice(1, 10, b"OggS").await,
    ];
    assert!(outcomes[0].record().is_some());
    assert!(outcomes[1].record().is_some());
    assert_eq!(outcomes[2], IngestOutcome::EmptyInputSkipped);
    let voice = outcomes[3].record().unwrap();
    assert_eq!(voice.source, Source::Voice);
    assert_eq!(voice.raw_text, "we need a courier, hire one");
    assert_eq!(voice.topic, "misc");
    assert_eq!(voice.urgency, Urgency::Low);

    // Older than the daily window, inside the summary window.
    let old = Classification {
        summary: "Nobody owns the warehouse".into(),
        hire_candidate: true,
        ..Default::default()
    };
    store
        .save_at(
            NewRecord::new(1, 10, Source::Text, "warehouse is a mess", old),
            Utc::now() - chrono::Duration::days(3),
        )
        .await
        .unwrap();

    let reporter = Reporter::new(store.clone(), 21);
    let daily = reporter.daily_digest().await.unwrap();
    assert!(daily.starts_with("📊 Daily report (24h)\nTotal messages: 3\n"));
    assert!(daily.contains("🧩 Delegate (top 1):\n• client churn — A key client is about to leave"));
    assert!(daily.contains("⚙️ Automate (top 1):\n• invoicing — Invoices are typed by hand"));
    assert!(daily.contains("👥 Hire: none"));
    assert!(daily.contains("📝 Important (high urgency):\n• client churn: A key client is about to leave"));
    assert!(!daily.contains("warehouse"));

    let summary = reporter.long_summary(21).await.unwrap();
    assert!(summary.starts_with("🧠 Diagnostic summary for 21 days"));
    assert!(summary.contains("1) ✅ Tasks to delegate:\n• A key client is about to leave"));
    assert!(summary.contains("2) ⚙️ Automation recommendations:\n• Invoices are typed by hand"));
    assert!(summary.contains("3) 👥 Hiring recommendations:\n• Nobody owns the warehouse"));

    let short = reporter.long_summary(1).await.unwrap();
    assert!(!short.contains("warehouse"));

    let stats = reporter.stats().await.unwrap();
    assert_eq!(stats.daily_count, 3);
    assert_eq!(stats.summary_count, 4);

    // Records survive a reopen.
    drop(reporter);
    drop(ingestor);
    drop(store);
    let reopened = LibSqlBackend::new_local(&path).await.unwrap();
    let all = reopened
        .query_window(Utc::now() - chrono::Duration::days(30))
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].raw_text, "warehouse is a mess");
}

#[tokio::test]
async fn concurrent_ingestion_writes_one_record_each() {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let ingestor = Arc::new(ingestor(store.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move {
                ingestor
                    .ingest_text(i, 100 + i, &format!("invoice number {i}"))
                    .await
            })
        })
        .collect();
    for h in handles {
        assert!(h.await.unwrap().record().is_some());
    }

    let records = store
        .query_window(Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(records.len(), 8);
    let mut ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn bot_run_processes_a_message_stream() {
    timeout(TEST_TIMEOUT, async {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let channel = Arc::new(RecordingChannel::default());
        let reporter = Arc::new(Reporter::new(store.clone(), 21));
        let bot = Arc::new(Bot::new(
            channel.clone(),
            Arc::new(ingestor(store.clone())),
            reporter,
            Some(1),
        ));

        let messages = vec![
            IncomingMessage {
                user_id: 1,
                chat_id: 10,
                username: Some("owner".into()),
                kind: MessageKind::Text("the client is unhappy".into()),
            },
            IncomingMessage {
                user_id: 1,
                chat_id: 10,
                username: Some("owner".into()),
                kind: MessageKind::Voice {
                    file_id: "v1".into(),
                    duration_secs: 4,
                },
            },
        ];
        Arc::clone(&bot)
            .run(Box::pin(futures::stream::iter(messages)))
            .await;

        // Handlers run on spawned tasks.
        while channel.sent.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut replies: Vec<String> = channel
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect();
        replies.sort();
        assert_eq!(
            replies,
            vec![
                "✅ Got it.".to_string(),
                "🎙️✅ Voice note transcribed and saved.".to_string(),
            ]
        );
        assert_eq!(
            store
                .count_since(Utc::now() - chrono::Duration::hours(1))
                .await
                .unwrap(),
            2
        );
    })
    .await
    .expect("test timed out");
}
