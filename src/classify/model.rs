//! Classification vocabulary and normalization of raw service output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum stored length of a topic label, in characters.
pub const TOPIC_MAX_CHARS: usize = 80;

/// Business domain a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Operations,
    Sales,
    Marketing,
    Finance,
    Hr,
    Service,
    Product,
    Strategy,
    Other,
    #[default]
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operations => "operations",
            Self::Sales => "sales",
            Self::Marketing => "marketing",
            Self::Finance => "finance",
            Self::Hr => "hr",
            Self::Service => "service",
            Self::Product => "product",
            Self::Strategy => "strategy",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse: canonical English labels plus the Russian labels the
    /// service was historically prompted with. Anything else is `Unknown`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "operations" | "ops" | "операционка" | "операции" => Self::Operations,
            "sales" | "продажи" => Self::Sales,
            "marketing" | "маркетинг" => Self::Marketing,
            "finance" | "финансы" => Self::Finance,
            "hr" | "персонал" => Self::Hr,
            "service" | "сервис" => Self::Service,
            "product" | "продукт" => Self::Product,
            "strategy" | "стратегия" => Self::Strategy,
            "other" | "прочее" => Self::Other,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How soon a message needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown urgency: {other}")),
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emotional tone of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Negative,
    #[default]
    Neutral,
    Positive,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "negative" => Ok(Self::Negative),
            "neutral" => Ok(Self::Neutral),
            "positive" => Ok(Self::Positive),
            other => Err(format!("unknown sentiment: {other}")),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully validated classification. Every field has a defined value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Cleaned-up text. Empty means "use the raw text".
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

impl Default for Classification {
    fn default() -> Self {
        Self {
            normalized_text: String::new(),
            category: Category::Unknown,
            topic: "unknown".to_string(),
            urgency: Urgency::Low,
            sentiment: Sentiment::Neutral,
            delegate_candidate: false,
            automate_candidate: false,
            hire_candidate: false,
            summary: String::new(),
        }
    }
}

/// Raw service payload. No field is trusted for presence or type.
#[derive(Debug, Default, Deserialize)]
pub struct RawClassification {
    #[serde(default)]
    pub normalized_text: Option<serde_json::Value>,
    #[serde(default)]
    pub category: Option<serde_json::Value>,
    #[serde(default)]
    pub topic: Option<serde_json::Value>,
    #[serde(default)]
    pub urgency: Option<serde_json::Value>,
    #[serde(default)]
    pub sentiment: Option<serde_json::Value>,
    #[serde(default)]
    pub delegate_candidate: Option<serde_json::Value>,
    #[serde(default)]
    pub automate_candidate: Option<serde_json::Value>,
    #[serde(default)]
    pub hire_candidate: Option<serde_json::Value>,
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
}

impl RawClassification {
    /// Replace every missing, mistyped or out-of-set field with its default.
    pub fn normalize(self) -> Classification {
        let defaults = Classification::default();

        let topic = text_field(self.topic)
            .map(|t| t.chars().take(TOPIC_MAX_CHARS).collect::<String>())
            .unwrap_or(defaults.topic);

        Classification {
            normalized_text: text_field(self.normalized_text).unwrap_or_default(),
            category: text_field(self.category)
                .map(|c| Category::parse_lenient(&c))
                .unwrap_or(defaults.category),
            topic,
            urgency: text_field(self.urgency)
                .and_then(|u| u.parse().ok())
                .unwrap_or(defaults.urgency),
            sentiment: text_field(self.sentiment)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sentiment),
            delegate_candidate: bool_field(self.delegate_candidate),
            automate_candidate: bool_field(self.automate_candidate),
            hire_candidate: bool_field(self.hire_candidate),
            summary: text_field(self.summary).unwrap_or(defaults.summary),
        }
    }
}

/// A trimmed, non-empty string, or `None`.
fn text_field(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        _ => None,
    }
}

/// JSON booleans, or the strings "true"/"yes"/"false"/"no". Anything else is false.
fn bool_field(value: Option<serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "yes")
        }
        _ => false,
    }
}
