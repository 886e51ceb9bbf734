//! Configuration types.
//!
//! Everything is read from environment variables once at startup into an
//! `AppConfig` that is passed down explicitly.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::classify::{ClassifierConfig, DEFAULT_MAX_INPUT_CHARS};
use crate::error::ConfigError;
use crate::llm::{LlmConfig, RetryPolicy};
use crate::reports::{DEFAULT_SUMMARY_DAYS, MAX_SUMMARY_DAYS};
use crate::scheduler::parse_schedule;

/// Retry backoff bounds, in seconds, accepted from the environment.
const BACKOFF_FLOOR_SECS: u64 = 1;
const BACKOFF_CEILING_SECS: u64 = 6;

/// Telegram bot settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: Option<SecretString>,
    /// Usernames or numeric ids; `*` allows everyone.
    pub allowed_users: Vec<String>,
    /// Destination of scheduled reports.
    pub owner_chat_id: Option<i64>,
}

/// HTTP server and webhook settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Public base URL the webhook is registered under.
    pub public_url: Option<String>,
    /// Path segment of the webhook route and key for the cron routes.
    pub webhook_secret: Option<SecretString>,
}

/// In-process report schedules (cron expressions, UTC).
#[derive(Debug, Clone, Default)]
pub struct ScheduleConfig {
    pub daily_cron: Option<String>,
    pub summary_cron: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub classifier: ClassifierConfig,
    pub db_path: PathBuf,
    pub summary_days: u32,
    pub telegram: TelegramConfig,
    pub server: ServerConfig,
    pub schedule: ScheduleConfig,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = var("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".into()))?;

        let request_timeout_secs: u64 = parse_or(&var, "BIZDIAG_REQUEST_TIMEOUT_SECS", 60)?;
        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into()),
            model: var("BIZDIAG_MODEL").unwrap_or_else(|| "gpt-4.1-mini".into()),
            transcribe_model: var("BIZDIAG_TRANSCRIBE_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini-transcribe".into()),
            request_timeout: Duration::from_secs(request_timeout_secs),
        };

        let max_attempts: u32 = parse_or(&var, "BIZDIAG_RETRY_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(invalid("BIZDIAG_RETRY_ATTEMPTS", "must be at least 1"));
        }
        let backoff_min: u64 = parse_or(&var, "BIZDIAG_BACKOFF_MIN_SECS", BACKOFF_FLOOR_SECS)?;
        let backoff_max: u64 = parse_or(&var, "BIZDIAG_BACKOFF_MAX_SECS", BACKOFF_CEILING_SECS)?;
        for (key, secs) in [
            ("BIZDIAG_BACKOFF_MIN_SECS", backoff_min),
            ("BIZDIAG_BACKOFF_MAX_SECS", backoff_max),
        ] {
            if !(BACKOFF_FLOOR_SECS..=BACKOFF_CEILING_SECS).contains(&secs) {
                return Err(invalid(
                    key,
                    &format!("must be between {BACKOFF_FLOOR_SECS} and {BACKOFF_CEILING_SECS}"),
                ));
            }
        }
        if backoff_min > backoff_max {
            return Err(invalid(
                "BIZDIAG_BACKOFF_MIN_SECS",
                "must not exceed BIZDIAG_BACKOFF_MAX_SECS",
            ));
        }
        let max_input_chars: usize =
            parse_or(&var, "BIZDIAG_MAX_INPUT_CHARS", DEFAULT_MAX_INPUT_CHARS)?;
        if max_input_chars == 0 {
            return Err(invalid("BIZDIAG_MAX_INPUT_CHARS", "must be positive"));
        }
        let classifier = ClassifierConfig {
            max_input_chars,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_secs(backoff_min),
                max_backoff: Duration::from_secs(backoff_max),
                jitter: true,
            },
        };

        let summary_days: u32 = parse_or(&var, "SUMMARY_DAYS", DEFAULT_SUMMARY_DAYS)?;
        if !(1..=MAX_SUMMARY_DAYS).contains(&summary_days) {
            return Err(invalid(
                "SUMMARY_DAYS",
                &format!("must be between 1 and {MAX_SUMMARY_DAYS}"),
            ));
        }

        let allowed_users: Vec<String> = var("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // 0 means no owner chat.
        let owner_chat_id = parse_opt::<i64>(&var, "OWNER_CHAT_ID")?.filter(|id| *id != 0);

        let telegram = TelegramConfig {
            bot_token: var("TELEGRAM_BOT_TOKEN").map(SecretString::from),
            allowed_users,
            owner_chat_id,
        };

        let server = ServerConfig {
            port: parse_or(&var, "PORT", 10000)?,
            public_url: var("PUBLIC_URL")
                .or_else(|| var("RENDER_EXTERNAL_URL"))
                .map(|u| u.trim_end_matches('/').to_string()),
            webhook_secret: var("WEBHOOK_SECRET").map(SecretString::from),
        };

        let schedule = ScheduleConfig {
            daily_cron: var("BIZDIAG_DAILY_CRON"),
            summary_cron: var("BIZDIAG_SUMMARY_CRON"),
        };
        for (key, expr) in [
            ("BIZDIAG_DAILY_CRON", &schedule.daily_cron),
            ("BIZDIAG_SUMMARY_CRON", &schedule.summary_cron),
        ] {
            if let Some(expr) = expr {
                parse_schedule(expr).map_err(|e| invalid(key, &e))?;
            }
        }

        Ok(Self {
            llm,
            classifier,
            db_path: var("BIZDIAG_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/bizdiag.db")),
            summary_days,
            telegram,
            server,
            schedule,
            log_dir: var("BIZDIAG_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Bot token, required by every mode that talks to Telegram.
    pub fn require_bot_token(&self) -> Result<SecretString, ConfigError> {
        self.telegram
            .bot_token
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_opt<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &format!("'{raw}': {e}"))),
        None => Ok(None),
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(var, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_api_key() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.llm.model, "gpt-4.1-mini");
        assert_eq!(config.llm.transcribe_model, "gpt-4o-mini-transcribe");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.request_timeout, Duration::from_secs(60));
        assert_eq!(config.classifier.max_input_chars, 8000);
        assert_eq!(config.classifier.retry.max_attempts, 3);
        assert_eq!(config.classifier.retry.max_backoff, Duration::from_secs(6));
        assert_eq!(config.summary_days, 21);
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.telegram.allowed_users, vec!["*"]);
        assert!(config.telegram.bot_token.is_none());
        assert!(config.telegram.owner_chat_id.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/bizdiag.db"));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));

        let err = load(&[("OPENAI_API_KEY", "   ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = load(&[("OPENAI_API_KEY", "k"), ("SUMMARY_DAYS", "three")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SUMMARY_DAYS"));

        let err = load(&[("OPENAI_API_KEY", "k"), ("PORT", "99999")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));

        let err = load(&[("OPENAI_API_KEY", "k"), ("BIZDIAG_RETRY_ATTEMPTS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn backoff_bounds_must_be_ordered() {
        let err = load(&[
            ("OPENAI_API_KEY", "k"),
            ("BIZDIAG_BACKOFF_MIN_SECS", "5"),
            ("BIZDIAG_BACKOFF_MAX_SECS", "2"),
        ])
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BIZDIAG_BACKOFF_MIN_SECS")
        );
    }

    #[test]
    fn backoff_bounds_stay_within_one_to_six_seconds() {
        let err = load(&[("OPENAI_API_KEY", "k"), ("BIZDIAG_BACKOFF_MAX_SECS", "600")]).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BIZDIAG_BACKOFF_MAX_SECS")
        );
        let err = load(&[("OPENAI_API_KEY", "k"), ("BIZDIAG_BACKOFF_MIN_SECS", "0")]).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BIZDIAG_BACKOFF_MIN_SECS")
        );

        let ok = load(&[
            ("OPENAI_API_KEY", "k"),
            ("BIZDIAG_BACKOFF_MIN_SECS", "2"),
            ("BIZDIAG_BACKOFF_MAX_SECS", "4"),
        ])
        .unwrap();
        assert_eq!(ok.classifier.retry.initial_backoff, Duration::from_secs(2));
        assert_eq!(ok.classifier.retry.max_backoff, Duration::from_secs(4));
    }

    #[test]
    fn summary_days_are_capped() {
        let err = load(&[("OPENAI_API_KEY", "k"), ("SUMMARY_DAYS", "200000000")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SUMMARY_DAYS"));
        let err = load(&[("OPENAI_API_KEY", "k"), ("SUMMARY_DAYS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        let ok = load(&[("OPENAI_API_KEY", "k"), ("SUMMARY_DAYS", "365")]).unwrap();
        assert_eq!(ok.summary_days, 365);
    }

    #[test]
    fn telegram_and_server_settings() {
        let config = load(&[
            ("OPENAI_API_KEY", "k"),
            ("TELEGRAM_BOT_TOKEN", "123:ABC"),
            ("TELEGRAM_ALLOWED_USERS", "owner, 42 ,"),
            ("OWNER_CHAT_ID", "4242"),
            ("WEBHOOK_SECRET", "s3cret"),
            ("RENDER_EXTERNAL_URL", "https://bizdiag.onrender.com/"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(config.require_bot_token().unwrap().expose_secret(), "123:ABC");
        assert_eq!(config.telegram.allowed_users, vec!["owner", "42"]);
        assert_eq!(config.telegram.owner_chat_id, Some(4242));
        assert_eq!(
            config.server.public_url.as_deref(),
            Some("https://bizdiag.onrender.com")
        );
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.server.webhook_secret.as_ref().unwrap().expose_secret(),
            "s3cret"
        );
    }

    #[test]
    fn public_url_prefers_explicit_setting() {
        let config = load(&[
            ("OPENAI_API_KEY", "k"),
            ("PUBLIC_URL", "https://bot.example.com"),
            ("RENDER_EXTERNAL_URL", "https://other.onrender.com"),
        ])
        .unwrap();
        assert_eq!(
            config.server.public_url.as_deref(),
            Some("https://bot.example.com")
        );
    }

    #[test]
    fn zero_owner_chat_means_unset() {
        let config = load(&[("OPENAI_API_KEY", "k"), ("OWNER_CHAT_ID", "0")]).unwrap();
        assert!(config.telegram.owner_chat_id.is_none());
        assert!(config.require_bot_token().is_err());
    }

    #[test]
    fn cron_expressions_are_validated() {
        let ok = load(&[("OPENAI_API_KEY", "k"), ("BIZDIAG_DAILY_CRON", "0 21 * * *")]).unwrap();
        assert_eq!(ok.schedule.daily_cron.as_deref(), Some("0 21 * * *"));

        let err = load(&[("OPENAI_API_KEY", "k"), ("BIZDIAG_SUMMARY_CRON", "every monday")])
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BIZDIAG_SUMMARY_CRON")
        );
    }
}
