//! HTTP surface: health check, Telegram webhook receiver and cron triggers.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::bot::{Bot, ReportKind};
use crate::channels::TelegramChannel;
use crate::reports::MAX_SUMMARY_DAYS;
use crate::store::RecordStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<Bot>,
    /// Used only to parse webhook updates and apply the allowlist.
    pub telegram: Arc<TelegramChannel>,
    pub store: Arc<dyn RecordStore>,
    /// Shared secret of the webhook path and the cron routes. When unset,
    /// every protected route answers 401.
    pub webhook_secret: Option<SecretString>,
    pub summary_days: u32,
}

impl AppState {
    fn secret_matches(&self, given: Option<&str>) -> bool {
        match (&self.webhook_secret, given) {
            (Some(expected), Some(given)) => expected.expose_secret() == given,
            _ => false,
        }
    }
}

/// Build the Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram/{secret}", post(telegram_webhook))
        .route("/cron/daily", get(cron_daily).post(cron_daily))
        .route("/cron/summary", get(cron_summary).post(cron_summary))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `0.0.0.0:{port}` and serve until the process exits.
pub async fn serve(port: u16, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.count_since(DateTime::<Utc>::MIN_UTC).await {
        Ok(records) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "service": "bizdiag",
                "records": records,
            })),
        ),
        Err(e) => {
            error!(error = %e, "Health check: store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "degraded",
                    "service": "bizdiag",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

// ── Webhook ─────────────────────────────────────────────────────────────

async fn telegram_webhook(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    if !state.secret_matches(Some(&secret)) {
        warn!("Webhook call with wrong secret");
        return unauthorized();
    }

    // Telegram redelivers on non-2xx, so bad or ignored updates still get 200.
    let update: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Webhook body is not JSON");
            return (StatusCode::OK, Json(serde_json::json!({"ok": true})));
        }
    };

    match state.telegram.accept_update(&update) {
        Some(msg) => {
            let bot = Arc::clone(&state.bot);
            tokio::spawn(async move {
                if let Err(e) = bot.handle(msg).await {
                    warn!(error = %e, "Failed to reply");
                }
            });
        }
        None => debug!("Webhook update ignored"),
    }

    (StatusCode::OK, Json(serde_json::json!({"ok": true})))
}

// ── Cron ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CronQuery {
    secret: Option<String>,
    days: Option<u32>,
}

async fn cron_daily(
    State(state): State<AppState>,
    Query(query): Query<CronQuery>,
) -> impl IntoResponse {
    if !state.secret_matches(query.secret.as_deref()) {
        warn!("Cron call with wrong secret");
        return unauthorized();
    }
    deliver(&state, ReportKind::Daily).await
}

async fn cron_summary(
    State(state): State<AppState>,
    Query(query): Query<CronQuery>,
) -> impl IntoResponse {
    if !state.secret_matches(query.secret.as_deref()) {
        warn!("Cron call with wrong secret");
        return unauthorized();
    }
    let days = query.days.unwrap_or(state.summary_days);
    if !(1..=MAX_SUMMARY_DAYS).contains(&days) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("days must be between 1 and {MAX_SUMMARY_DAYS}")
            })),
        );
    }
    deliver(&state, ReportKind::Summary { days }).await
}

async fn deliver(state: &AppState, kind: ReportKind) -> (StatusCode, Json<serde_json::Value>) {
    match state.bot.deliver_to_owner(kind).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "report": kind.label()})),
        ),
        Err(e) => {
            error!(report = kind.label(), error = %e, "Cron delivery failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"ok": false, "error": e.to_string()})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::channels::{Channel, IncomingMessage, MessageStream};
    use crate::classify::{Classifier, ClassifierConfig};
    use crate::error::{ChannelError, LlmError};
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider, RetryPolicy,
        TranscriptionRequest,
    };
    use crate::pipeline::Ingestor;
    use crate::reports::Reporter;
    use crate::store::LibSqlBackend;

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
            Ok(Vec::new())
        }
    }

    struct StubLlm;

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: r#"{"category":"sales","topic":"leads","summary":"Few leads"}"#.into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn transcribe(&self, _request: TranscriptionRequest) -> Result<String, LlmError> {
            Ok(String::new())
        }
    }

    async fn setup(owner: Option<i64>) -> (Router, Arc<RecordingChannel>) {
        setup_with_secret(owner, Some("s3cret")).await
    }

    async fn setup_with_secret(
        owner: Option<i64>,
        secret: Option<&str>,
    ) -> (Router, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let classifier = Arc::new(Classifier::new(
            Arc::new(StubLlm),
            ClassifierConfig {
                retry: RetryPolicy::immediate(1),
                ..Default::default()
            },
        ));
        let ingestor = Arc::new(Ingestor::new(classifier, store.clone()));
        let reporter = Arc::new(Reporter::new(store.clone(), 21));
        let bot = Arc::new(Bot::new(channel.clone(), ingestor, reporter, owner));
        let telegram = Arc::new(TelegramChannel::new(
            SecretString::from("123:abc"),
            vec!["*".into()],
        ));
        let state = AppState {
            bot,
            telegram,
            store,
            webhook_secret: secret.map(SecretString::from),
            summary_days: 21,
        };
        (router(state), channel)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_record_count() {
        let (app, _) = setup(None).await;
        let resp = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["records"], 0);
    }

    #[tokio::test]
    async fn cron_routes_reject_wrong_or_missing_secret() {
        let (app, channel) = setup(Some(1)).await;
        for uri in [
            "/cron/daily",
            "/cron/daily?secret=nope",
            "/cron/summary?secret=nope&days=7",
        ] {
            let resp = app.clone().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cron_daily_sends_report_to_owner() {
        let (app, channel) = setup(Some(42)).await;
        let resp = app
            .oneshot(post_req("/cron/daily?secret=s3cret", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["report"], "daily");

        let sent = channel.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![(42, "No messages in the last 24 hours.".to_string())]);
    }

    #[tokio::test]
    async fn cron_summary_uses_days_or_default() {
        let (app, channel) = setup(Some(42)).await;
        let resp = app
            .clone()
            .oneshot(get_req("/cron/summary?secret=s3cret&days=7"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app
            .clone()
            .oneshot(get_req("/cron/summary?secret=s3cret"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app
            .oneshot(get_req("/cron/summary?secret=s3cret&days=0"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let sent: Vec<String> = channel
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect();
        assert_eq!(
            sent,
            vec![
                "No messages in the last 7 days.".to_string(),
                "No messages in the last 21 days.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn cron_without_owner_chat_is_server_error() {
        let (app, _) = setup(None).await;
        let resp = app
            .oneshot(get_req("/cron/daily?secret=s3cret"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("OWNER_CHAT_ID"));
    }

    #[tokio::test]
    async fn webhook_rejects_wrong_secret() {
        let (app, _) = setup(None).await;
        let resp = app
            .oneshot(post_req("/telegram/wrong", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_acknowledges_garbage_body() {
        let (app, _) = setup(None).await;
        let resp = app
            .oneshot(post_req("/telegram/s3cret", "not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_update_is_ingested_and_acknowledged() {
        let (app, channel) = setup(None).await;
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 5, "username": "owner"},
                "chat": {"id": 50},
                "text": "we need more leads"
            }
        });
        let resp = app
            .clone()
            .oneshot(post_req("/telegram/s3cret", &update.to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // The reply is sent from a spawned task.
        for _ in 0..100 {
            if !channel.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = channel.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![(50, "✅ Got it.".to_string())]);

        let resp = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(body_json(resp).await["records"], 1);
    }

    #[tokio::test]
    async fn unset_secret_locks_protected_routes() {
        let (app, _) = setup_with_secret(Some(42), None).await;
        let resp = app
            .clone()
            .oneshot(get_req("/cron/daily?secret="))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = app
            .oneshot(post_req("/telegram/anything", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
