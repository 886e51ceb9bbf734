//! Channel abstraction for message I/O.

pub mod telegram;

pub use telegram::TelegramChannel;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;

/// What an inbound message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Free text to ingest.
    Text(String),
    /// A voice note, fetched lazily by file id.
    Voice { file_id: String, duration_secs: u32 },
    /// A `/command`, lowercased, without the leading slash or `@botname`.
    Command { name: String, args: String },
}

/// Inbound message from a channel, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub kind: MessageKind,
}

impl IncomingMessage {
    /// Identities checked against an allowlist: numeric id, then username.
    pub fn identities(&self) -> Vec<String> {
        let mut ids = vec![self.user_id.to_string()];
        if let Some(name) = &self.username {
            ids.push(name.clone());
        }
        ids
    }
}

/// Stream of inbound messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A bidirectional chat channel.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Start receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send text to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError>;

    /// Fetch a file attached to a message (voice notes).
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError>;
}
