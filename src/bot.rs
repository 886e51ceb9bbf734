//! Bot dispatcher: routes inbound chat messages to ingestion or reports
//! and turns the result into a reply.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info, warn};

use crate::channels::{Channel, IncomingMessage, MessageKind, MessageStream};
use crate::error::{ChannelError, DatabaseError};
use crate::pipeline::{IngestOutcome, Ingestor};
use crate::reports::{MAX_SUMMARY_DAYS, Reporter};

pub const GREETING: &str = "Hi! Send me text or a voice note and I'll transcribe it, \
classify it and add it to your business diagnostic.\n\
/daily shows the last 24 hours, /summary the long-window diagnostic, /stats the counts.";

/// A report that can be delivered on demand or on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Daily,
    Summary { days: u32 },
}

impl ReportKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Summary { .. } => "summary",
        }
    }
}

/// Acknowledgement text for an ingestion outcome. `None` means stay silent.
pub fn ack_text(outcome: &IngestOutcome, voice: bool) -> Option<&'static str> {
    match outcome {
        IngestOutcome::Persisted(_) if voice => Some("🎙️✅ Voice note transcribed and saved."),
        IngestOutcome::Persisted(_) => Some("✅ Got it."),
        IngestOutcome::EmptyInputSkipped => None,
        IngestOutcome::TranscriptionEmpty => {
            Some("Couldn't make out any speech. Please try again.")
        }
        IngestOutcome::ClassificationFailed => {
            Some("⚠️ The analysis service is unavailable right now. Please resend in a minute.")
        }
        IngestOutcome::StoreFailed => {
            Some("⚠️ Couldn't save the message right now. Please resend in a minute.")
        }
    }
}

/// Chat bot wiring a channel to the ingestor and reporter.
pub struct Bot {
    channel: Arc<dyn Channel>,
    ingestor: Arc<Ingestor>,
    reporter: Arc<Reporter>,
    owner_chat_id: Option<i64>,
}

impl Bot {
    pub fn new(
        channel: Arc<dyn Channel>,
        ingestor: Arc<Ingestor>,
        reporter: Arc<Reporter>,
        owner_chat_id: Option<i64>,
    ) -> Self {
        Self {
            channel,
            ingestor,
            reporter,
            owner_chat_id,
        }
    }

    /// Consume a message stream, handling each message on its own task.
    pub async fn run(self: Arc<Self>, mut stream: MessageStream) {
        info!(channel = self.channel.name(), "Bot running");
        while let Some(msg) = stream.next().await {
            let bot = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = bot.handle(msg).await {
                    warn!(error = %e, "Failed to reply");
                }
            });
        }
        info!("Message stream ended");
    }

    /// Handle one message and send the reply, if any.
    pub async fn handle(&self, msg: IncomingMessage) -> Result<(), ChannelError> {
        match self.reply_for(&msg).await {
            Some(reply) => self.channel.send_message(msg.chat_id, &reply).await,
            None => Ok(()),
        }
    }

    async fn reply_for(&self, msg: &IncomingMessage) -> Option<String> {
        match &msg.kind {
            MessageKind::Text(text) => {
                let outcome = self
                    .ingestor
                    .ingest_text(msg.user_id, msg.chat_id, text)
                    .await;
                ack_text(&outcome, false).map(String::from)
            }
            MessageKind::Voice { file_id, .. } => {
                let audio = match self.channel.download_file(file_id).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(user_id = msg.user_id, error = %e, "Voice download failed");
                        return Some(
                            "⚠️ Couldn't fetch the voice note. Please try again.".to_string(),
                        );
                    }
                };
                let outcome = self
                    .ingestor
                    .ingest_voice(msg.user_id, msg.chat_id, &audio)
                    .await;
                ack_text(&outcome, true).map(String::from)
            }
            MessageKind::Command { name, args } => self.command(name, args).await,
        }
    }

    async fn command(&self, name: &str, args: &str) -> Option<String> {
        match name {
            "start" | "help" => Some(GREETING.to_string()),
            "daily" => Some(self.report_text(ReportKind::Daily).await),
            "summary" => {
                let days = parse_days(args).unwrap_or(self.reporter.summary_days());
                Some(self.report_text(ReportKind::Summary { days }).await)
            }
            "stats" => Some(match self.reporter.stats().await {
                Ok(s) => format!(
                    "📈 Messages in the last {}h: {}\nMessages in the last {} days: {}",
                    s.daily_hours, s.daily_count, s.summary_days, s.summary_count
                ),
                Err(e) => report_failure(&e),
            }),
            _ => Some(format!("Unknown command /{name}. Try /start.")),
        }
    }

    async fn report_text(&self, kind: ReportKind) -> String {
        match self.build_report(kind).await {
            Ok(text) => text,
            Err(e) => report_failure(&e),
        }
    }

    pub async fn build_report(&self, kind: ReportKind) -> Result<String, DatabaseError> {
        match kind {
            ReportKind::Daily => self.reporter.daily_digest().await,
            ReportKind::Summary { days } => self.reporter.long_summary(days).await,
        }
    }

    /// Build a report and send it to the owner chat. Used by cron routes,
    /// the in-process scheduler and the one-shot CLI modes.
    pub async fn deliver_to_owner(&self, kind: ReportKind) -> anyhow::Result<()> {
        let Some(chat_id) = self.owner_chat_id else {
            anyhow::bail!("OWNER_CHAT_ID is not set; cannot deliver {} report", kind.label());
        };
        let text = self.build_report(kind).await?;
        self.channel.send_message(chat_id, &text).await?;
        info!(report = kind.label(), chat_id, "Report delivered");
        Ok(())
    }
}

fn report_failure(e: &DatabaseError) -> String {
    error!(error = %e, "Report generation failed");
    "⚠️ Couldn't build the report right now.".to_string()
}

/// Parse the optional day count of `/summary N`.
fn parse_days(args: &str) -> Option<u32> {
    args.split_whitespace()
        .next()?
        .parse::<u32>()
        .ok()
        .filter(|d| (1..=MAX_SUMMARY_DAYS).contains(d))
}
