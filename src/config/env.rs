//! Process settings resolved from environment variables
//!
//! Every component receives a shared reference to one [`Settings`] value
//! built at startup; nothing below `main` reads the environment directly.
//!
//! ```bash
//! export UPBIT_API_BASE="https://api.upbit.com"
//! export UPBIT_QUOTE="KRW"
//! export FEE_RATE="0.0005"
//! export START_CASH_KRW="100000000"
//! export SIGNATURE="gpt-4o-upbit"
//! export UPBIT_BAR="10m"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use url::Url;

use super::exchange_today;
use crate::error::{Error, Result};

/// Environment variable names
pub mod env_vars {
    pub const API_BASE: &str = "UPBIT_API_BASE";
    pub const QUOTE: &str = "UPBIT_QUOTE";
    pub const FEE_RATE: &str = "FEE_RATE";
    pub const START_CASH: &str = "START_CASH_KRW";
    pub const DATA_ROOT: &str = "AGENT_DATA_DIR";
    pub const SIGNATURE: &str = "SIGNATURE";
    pub const TODAY_DATE: &str = "TODAY_DATE";
    pub const BAR: &str = "UPBIT_BAR";
    pub const BAR_MINUTES: &str = "UPBIT_BAR_MINUTES";
    pub const BAR_COUNT: &str = "UPBIT_BAR_COUNT";
    pub const HTTP_TIMEOUT: &str = "PRICE_HTTP_TIMEOUT_SECS";
    pub const TICKER_TTL: &str = "TICKER_CACHE_TTL_SECS";
    pub const DAILY_TTL: &str = "DAILY_PRICE_CACHE_TTL_SECS";
}

pub const DEFAULT_API_BASE: &str = "https://api.upbit.com";
pub const DEFAULT_QUOTE: &str = "KRW";
pub const DEFAULT_FEE_RATE: f64 = 0.0005;
pub const DEFAULT_START_CASH: f64 = 100_000_000.0;
pub const DEFAULT_DATA_ROOT: &str = "./data/agent_data";
pub const DEFAULT_BAR_MINUTES: u32 = 10;
pub const DEFAULT_BAR_COUNT: u32 = 30;

/// Immutable runtime settings shared by the price source, the paper broker,
/// the dashboard and the tool layer.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Base URL of the public price REST API
    pub api_base: String,
    /// Quote currency used to qualify bare symbols (e.g. `BTC` -> `KRW-BTC`)
    pub quote_currency: String,
    /// Proportional trading fee (0.0005 = 0.05%)
    pub fee_rate: f64,
    /// Cash seeded into a freshly bootstrapped ledger
    pub start_cash: f64,
    /// Root directory holding one sub-directory per account
    pub data_root: PathBuf,
    /// Account identity used by the tool layer
    pub signature: Option<String>,
    /// Trading date stamped on ledger records
    pub today_date: Option<NaiveDate>,
    /// Default minute-candle size for price tools
    pub bar_minutes: u32,
    /// Default minute-candle history length for price tools
    pub bar_count: u32,
    /// Timeout applied to every price source request
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
    /// Live ticker cache lifetime in the dashboard
    #[serde(with = "duration_secs")]
    pub ticker_cache_ttl: Duration,
    /// Historical daily close cache lifetime in the dashboard
    #[serde(with = "duration_secs")]
    pub daily_price_cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            quote_currency: DEFAULT_QUOTE.to_string(),
            fee_rate: DEFAULT_FEE_RATE,
            start_cash: DEFAULT_START_CASH,
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            signature: None,
            today_date: None,
            bar_minutes: DEFAULT_BAR_MINUTES,
            bar_count: DEFAULT_BAR_COUNT,
            http_timeout: Duration::from_secs(10),
            ticker_cache_ttl: Duration::from_secs(5),
            daily_price_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Settings {
    /// Build settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup
    ///
    /// Numeric values that fail to parse fall back to their defaults with a
    /// warning. A malformed base URL or `TODAY_DATE` is a hard error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_base = get(env_vars::API_BASE).unwrap_or(defaults.api_base);
        Url::parse(&api_base)
            .map_err(|e| Error::Config(format!("invalid {}: {}", env_vars::API_BASE, e)))?;
        let api_base = api_base.trim_end_matches('/').to_string();

        let quote_currency = get(env_vars::QUOTE)
            .map(|q| q.to_uppercase())
            .unwrap_or(defaults.quote_currency);

        let fee_rate = parse_non_negative(get(env_vars::FEE_RATE), env_vars::FEE_RATE, defaults.fee_rate);
        let start_cash = parse_non_negative(
            get(env_vars::START_CASH),
            env_vars::START_CASH,
            defaults.start_cash,
        );

        let data_root = get(env_vars::DATA_ROOT)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_root);

        let today_date = match get(env_vars::TODAY_DATE) {
            Some(raw) => Some(NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                Error::Config(format!(
                    "{} must be YYYY-MM-DD, got {:?}: {}",
                    env_vars::TODAY_DATE,
                    raw,
                    e
                ))
            })?),
            None => None,
        };

        let bar_minutes = get(env_vars::BAR)
            .and_then(|raw| parse_bar_minutes(&raw))
            .or_else(|| {
                get(env_vars::BAR_MINUTES)
                    .and_then(|raw| raw.parse::<u32>().ok())
                    .map(|m| m.max(1))
            })
            .unwrap_or(defaults.bar_minutes);

        let bar_count = get(env_vars::BAR_COUNT)
            .and_then(|raw| raw.parse::<u32>().ok())
            .map(|c| c.max(1))
            .unwrap_or(defaults.bar_count);

        let secs = |key: &str, default: Duration| {
            get(key)
                .and_then(|raw| raw.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Ok(Self {
            api_base,
            quote_currency,
            fee_rate,
            start_cash,
            data_root,
            signature: get(env_vars::SIGNATURE),
            today_date,
            bar_minutes,
            bar_count,
            http_timeout: secs(env_vars::HTTP_TIMEOUT, defaults.http_timeout),
            ticker_cache_ttl: secs(env_vars::TICKER_TTL, defaults.ticker_cache_ttl),
            daily_price_cache_ttl: secs(env_vars::DAILY_TTL, defaults.daily_price_cache_ttl),
        })
    }

    /// Account identity, or a configuration error when none is set
    pub fn require_signature(&self) -> Result<&str> {
        self.signature.as_deref().ok_or_else(|| {
            Error::Config(format!("{} is not set", env_vars::SIGNATURE))
        })
    }

    /// Trading date for new ledger records
    pub fn trading_date(&self) -> NaiveDate {
        self.today_date.unwrap_or_else(exchange_today)
    }
}

/// Parse a bar size such as `"10m"`, `"4h"` or `"240"` into minutes
pub fn parse_bar_minutes(raw: &str) -> Option<u32> {
    let v = raw.trim().to_lowercase();
    let minutes = if let Some(m) = v.strip_suffix('m') {
        m.parse::<u32>().ok()?
    } else if let Some(h) = v.strip_suffix('h') {
        h.parse::<u32>().ok()?.checked_mul(60)?
    } else {
        v.parse::<u32>().ok()?
    };
    Some(minutes.max(1))
}

fn parse_non_negative(raw: Option<String>, key: &str, default: f64) -> f64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
            tracing::warn!(key = key, value = %raw, default = default, "Invalid value, using default");
            default
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
