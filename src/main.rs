use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use secrecy::ExposeSecret;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use bizdiag::bot::{Bot, ReportKind};
use bizdiag::channels::{Channel, TelegramChannel};
use bizdiag::classify::Classifier;
use bizdiag::config::{AppConfig, ScheduleConfig};
use bizdiag::error::ConfigError;
use bizdiag::llm::create_provider;
use bizdiag::pipeline::Ingestor;
use bizdiag::reports::{MAX_SUMMARY_DAYS, Reporter};
use bizdiag::scheduler::{self, Scheduler, parse_schedule};
use bizdiag::server::{self, AppState};
use bizdiag::store::LibSqlBackend;

const USAGE: &str = "usage: bizdiag [poll|webhook|daily|summary [DAYS]]";

/// How the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Long-poll Telegram and serve the HTTP routes.
    Poll,
    /// Register the webhook and serve the HTTP routes.
    Webhook,
    /// Send the daily digest to the owner chat and exit.
    Daily,
    /// Send the long summary to the owner chat and exit.
    Summary { days: Option<u32> },
    Help,
}

fn parse_mode(args: &[String]) -> anyhow::Result<Mode> {
    match args.first().map(String::as_str) {
        None | Some("poll") => Ok(Mode::Poll),
        Some("webhook") => Ok(Mode::Webhook),
        Some("daily") => Ok(Mode::Daily),
        Some("summary") => {
            let days = args
                .get(1)
                .map(|raw| {
                    raw.parse::<u32>()
                        .ok()
                        .filter(|d| (1..=MAX_SUMMARY_DAYS).contains(d))
                        .with_context(|| format!("invalid day count '{raw}'\n{USAGE}"))
                })
                .transpose()?;
            Ok(Mode::Summary { days })
        }
        Some("-h" | "--help" | "help") => Ok(Mode::Help),
        Some(other) => anyhow::bail!("unknown mode '{other}'\n{USAGE}"),
    }
}

/// Console logging plus an optional daily-rolling file. The guard must live
/// until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bizdiag.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn build_scheduler(config: &ScheduleConfig, summary_days: u32) -> anyhow::Result<Scheduler> {
    let now = Utc::now();
    let mut scheduler = Scheduler::new();
    if let Some(expr) = &config.daily_cron {
        let schedule = parse_schedule(expr).map_err(anyhow::Error::msg)?;
        scheduler.add(ReportKind::Daily, schedule, now);
    }
    if let Some(expr) = &config.summary_cron {
        let schedule = parse_schedule(expr).map_err(anyhow::Error::msg)?;
        scheduler.add(ReportKind::Summary { days: summary_days }, schedule, now);
    }
    Ok(scheduler)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_mode(&args)?;
    if mode == Mode::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());
    run(config, mode).await
}

async fn run(config: AppConfig, mode: Mode) -> anyhow::Result<()> {
    eprintln!("📊 Bizdiag v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Core ────────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    let llm = create_provider(&config.llm)?;
    let classifier = Arc::new(Classifier::new(llm, config.classifier.clone()));
    let ingestor = Arc::new(Ingestor::new(classifier, store.clone()));
    let reporter = Arc::new(Reporter::new(store.clone(), config.summary_days));

    // ── Telegram ────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(
        config.require_bot_token()?,
        config.telegram.allowed_users.clone(),
    ));
    eprintln!(
        "   Telegram: allowed {}",
        if config.telegram.allowed_users.iter().any(|u| u == "*") {
            "everyone".to_string()
        } else {
            config.telegram.allowed_users.join(", ")
        }
    );
    let bot = Arc::new(Bot::new(
        telegram.clone(),
        ingestor,
        reporter,
        config.telegram.owner_chat_id,
    ));

    let one_shot = match mode {
        Mode::Daily => Some(ReportKind::Daily),
        Mode::Summary { days } => Some(ReportKind::Summary {
            days: days.unwrap_or(config.summary_days),
        }),
        _ => None,
    };
    if let Some(kind) = one_shot {
        bot.deliver_to_owner(kind).await?;
        return Ok(());
    }

    // ── Schedules ───────────────────────────────────────────────────────
    let jobs = build_scheduler(&config.schedule, config.summary_days)?;
    let _cron_handle = if jobs.is_empty() {
        eprintln!("   Schedules: none");
        None
    } else {
        if config.telegram.owner_chat_id.is_none() {
            tracing::warn!("Report schedules set but OWNER_CHAT_ID is not; deliveries will fail");
        }
        eprintln!(
            "   Schedules: daily={} summary={}",
            config.schedule.daily_cron.as_deref().unwrap_or("-"),
            config.schedule.summary_cron.as_deref().unwrap_or("-"),
        );
        Some(scheduler::spawn_cron_ticker(
            jobs,
            Arc::clone(&bot),
            scheduler::DEFAULT_TICK,
        ))
    };

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = server::router(AppState {
        bot: Arc::clone(&bot),
        telegram: Arc::clone(&telegram),
        store,
        webhook_secret: config.server.webhook_secret.clone(),
        summary_days: config.summary_days,
    });
    let port = config.server.port;
    eprintln!("   HTTP: http://0.0.0.0:{port}/health\n");

    match mode {
        Mode::Webhook => {
            let public_url = config
                .server
                .public_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingEnvVar("PUBLIC_URL".into()))?;
            let secret = config
                .server
                .webhook_secret
                .as_ref()
                .ok_or_else(|| ConfigError::MissingEnvVar("WEBHOOK_SECRET".into()))?;
            telegram
                .set_webhook(&format!("{public_url}/telegram/{}", secret.expose_secret()))
                .await?;
            server::serve(port, app).await
        }
        _ => {
            tokio::spawn(async move {
                if let Err(e) = server::serve(port, app).await {
                    tracing::error!(error = %e, "HTTP server stopped");
                }
            });
            let stream = telegram.start().await?;
            bot.run(stream).await;
            Ok(())
        }
    }
}
