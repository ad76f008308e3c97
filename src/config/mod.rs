//! Configuration for the trading agent

pub mod env;

use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use env::Settings;

/// Exchange local time (KST) as seconds east of UTC
pub const EXCHANGE_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// Fixed offset of the exchange's local clock
pub fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Current wall-clock time in exchange local time
pub fn exchange_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&exchange_offset())
}

/// Current calendar date in exchange local time
pub fn exchange_today() -> NaiveDate {
    exchange_now().date_naive()
}

/// Supported agent strategies, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AgentKind {
    /// Tool-calling LLM loop over balance, price and trade tools
    #[default]
    #[serde(rename = "BaseAgent")]
    Base,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Base => "BaseAgent",
        }
    }
}

/// One trading identity driven by one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Display name
    pub name: String,
    /// Underlying LLM model identifier
    pub basemodel: String,
    /// Account signature (ledger namespace)
    pub signature: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Run configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent_type: AgentKind,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Baseline cash for return calculations (defaults to `START_CASH_KRW`)
    #[serde(default)]
    pub initial_cash: Option<f64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_type: AgentKind::Base,
            models: Vec::new(),
            initial_cash: None,
        }
    }
}

impl AppConfig {
    /// Load a run configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Models that are switched on
    pub fn enabled_models(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.iter().filter(|m| m.enabled)
    }

    /// Baseline cash, falling back to the process setting
    pub fn initial_cash(&self, settings: &Settings) -> f64 {
        self.initial_cash.unwrap_or(settings.start_cash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_config_deserialize_defaults() {
        let value = serde_json::json!({
            "models": [
                { "name": "gpt", "basemodel": "openai/gpt-4o", "signature": "gpt-upbit" },
                { "name": "off", "basemodel": "x", "signature": "off", "enabled": false }
            ]
        });
        let parsed: AppConfig = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.agent_type, AgentKind::Base);
        let enabled: Vec<_> = parsed.enabled_models().map(|m| m.signature.as_str()).collect();
        assert_eq!(enabled, vec!["gpt-upbit"]);
        assert_eq!(parsed.initial_cash(&Settings::default()), 100_000_000.0);
    }

    #[test]
    fn unknown_agent_type_is_rejected() {
        let value = serde_json::json!({ "agent_type": "ReflectiveAgent", "models": [] });
        assert!(serde_json::from_value::<AppConfig>(value).is_err());

        let value = serde_json::json!({ "agent_type": "BaseAgent", "initial_cash": 5000.0 });
        let parsed: AppConfig = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.agent_type.name(), "BaseAgent");
        assert_eq!(parsed.initial_cash(&Settings::default()), 5000.0);
    }

    #[test]
    fn exchange_clock_is_utc_plus_nine() {
        assert_eq!(exchange_offset().local_minus_utc(), 9 * 3600);
    }
}
