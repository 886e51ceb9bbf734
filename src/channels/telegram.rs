//! Telegram channel over the Bot API.
//!
//! Receives updates either by long-polling `getUpdates` or through a webhook
//! (see `server.rs`); both paths share `parse_update`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::{Channel, IncomingMessage, MessageKind, MessageStream};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll.
const POLL_ERROR_BACKOFF_SECS: u64 = 5;

/// Telegram channel.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

fn send_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason: reason.into(),
    }
}

fn download_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::DownloadFailed {
        name: "telegram".into(),
        reason: reason.into(),
    }
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at another Bot API host (local API server, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Check if a username or numeric id is in the allowed list.
    pub fn is_user_allowed(&self, identity: &str) -> bool {
        check_user_allowed(&self.allowed_users, [identity])
    }

    /// Whether a parsed message comes from an allowed sender.
    pub fn accepts(&self, msg: &IncomingMessage) -> bool {
        let ids = msg.identities();
        check_user_allowed(&self.allowed_users, ids.iter().map(String::as_str))
    }

    /// Parse a raw update and apply the allowlist.
    pub fn accept_update(&self, update: &serde_json::Value) -> Option<IncomingMessage> {
        let msg = parse_update(update)?;
        if self.accepts(&msg) {
            Some(msg)
        } else {
            tracing::warn!(
                user_id = msg.user_id,
                username = msg.username.as_deref().unwrap_or("unknown"),
                "Telegram: ignoring message from unauthorized user"
            );
            None
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, String> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("{method}: {}", e.without_url()))?;
        let status = resp.status();
        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| format!("{method} returned {status}: {}", e.without_url()))?;
        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(format!(
                "{method} returned {status}: {}",
                description.unwrap_or_else(|| "no description".into())
            )),
        }
    }

    /// Register a webhook, dropping updates queued while the bot was down.
    pub async fn set_webhook(&self, url: &str) -> Result<(), ChannelError> {
        self.call::<bool>(
            "setWebhook",
            serde_json::json!({
                "url": url,
                "allowed_updates": ["message"],
                "drop_pending_updates": true,
            }),
        )
        .await
        .map_err(|reason| ChannelError::StartupFailed {
            name: "telegram".into(),
            reason,
        })?;
        tracing::info!("Telegram webhook registered");
        Ok(())
    }

    /// Remove any webhook so that `getUpdates` is allowed.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        self.call::<bool>(
            "deleteWebhook",
            serde_json::json!({ "drop_pending_updates": false }),
        )
        .await
        .map_err(|reason| ChannelError::StartupFailed {
            name: "telegram".into(),
            reason,
        })?;
        Ok(())
    }

    /// Check the token with `getMe`.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        self.call::<serde_json::Value>("getMe", serde_json::json!({}))
            .await
            .map(|_| ())
            .map_err(|reason| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason,
            })
    }

    /// Send a single message chunk (≤4096 chars) as plain text.
    async fn send_message_chunk(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        self.call::<serde_json::Value>(
            "sendMessage",
            serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }),
        )
        .await
        .map(|_| ())
        .map_err(send_failed)
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        self.delete_webhook().await?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let backoff = std::time::Duration::from_secs(POLL_ERROR_BACKOFF_SECS);

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e.without_url(), "Telegram poll error");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                };

                let data: ApiResponse<Vec<serde_json::Value>> = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(error = %e.without_url(), "Telegram parse error");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                };

                if !data.ok {
                    tracing::warn!(
                        description = data.description.as_deref().unwrap_or(""),
                        "Telegram getUpdates rejected"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }

                for update in data.result.unwrap_or_default() {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(&update) else {
                        continue;
                    };

                    let ids = incoming.identities();
                    if !check_user_allowed(&allowed_users, ids.iter().map(String::as_str)) {
                        tracing::warn!(
                            user_id = incoming.user_id,
                            "Telegram: ignoring message from unauthorized user"
                        );
                        continue;
                    }

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let info: FileInfo = self
            .call("getFile", serde_json::json!({ "file_id": file_id }))
            .await
            .map_err(download_failed)?;
        let file_path = info
            .file_path
            .ok_or_else(|| download_failed("getFile returned no file_path"))?;

        let resp = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(|e| download_failed(e.without_url().to_string()))?;
        if !resp.status().is_success() {
            return Err(download_failed(format!(
                "file download returned {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| download_failed(e.without_url().to_string()))?;
        tracing::debug!(bytes = bytes.len(), "Telegram file downloaded");
        Ok(bytes.to_vec())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Turn a raw update into an `IncomingMessage`.
///
/// Returns `None` for updates without a `message` (edits, channel posts),
/// and for messages that are neither text nor voice.
pub fn parse_update(update: &serde_json::Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let from = message.get("from");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(chat_id);
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    let kind = if let Some(text) = message.get("text").and_then(serde_json::Value::as_str) {
        parse_text(text)
    } else if let Some(voice) = message.get("voice") {
        MessageKind::Voice {
            file_id: voice.get("file_id")?.as_str()?.to_string(),
            duration_secs: voice
                .get("duration")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32,
        }
    } else {
        return None;
    };

    Some(IncomingMessage {
        user_id,
        chat_id,
        username,
        kind,
    })
}

fn parse_text(text: &str) -> MessageKind {
    let Some(rest) = text.trim_start().strip_prefix('/') else {
        return MessageKind::Text(text.to_string());
    };
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    MessageKind::Command {
        name,
        args: args.to_string(),
    }
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
