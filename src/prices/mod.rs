//! Price source abstraction
//!
//! The paper broker needs a fill price for market orders and the dashboard
//! needs historical closes and live tickers. Both talk to a [`PriceSource`],
//! implemented against the Upbit public REST API by [`UpbitClient`] and by
//! in-memory stubs in tests.

mod upbit;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use upbit::UpbitClient;

/// Maximum number of markets per ticker request
pub const MAX_TICKER_BATCH: usize = 50;

/// Error type for price source requests
#[derive(Error, Debug)]
pub enum PriceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("No price data for {market}")]
    Empty { market: String },
}

/// One OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle start time (exchange local time when available)
    pub time: Option<String>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One row of a batch ticker response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerQuote {
    /// Bare coin symbol (e.g. `BTC`)
    pub symbol: String,
    /// Fully qualified market (e.g. `KRW-BTC`)
    pub market: String,
    pub trade_price: Option<f64>,
    pub signed_change_rate: Option<f64>,
    pub acc_trade_price_24h: Option<f64>,
    /// `ok`, `http_<code>`, `error`, or `unavailable` when the exchange
    /// omitted the market from its response
    pub status: String,
}

impl TickerQuote {
    /// Placeholder row for a market whose batch request failed
    pub fn failed(market: &str, status: impl Into<String>) -> Self {
        Self {
            symbol: coin_symbol(market),
            market: market.to_string(),
            trade_price: None,
            signed_change_rate: None,
            acc_trade_price_24h: None,
            status: status.into(),
        }
    }

    /// Usable live price, if the row carries one
    pub fn price(&self) -> Option<f64> {
        self.trade_price.filter(|p| p.is_finite() && *p > 0.0)
    }
}

/// Minute candle sizes supported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MinuteUnit {
    M1,
    M3,
    M5,
    M10,
    M15,
    M30,
    M60,
    M240,
}

impl MinuteUnit {
    pub const ALL: [MinuteUnit; 8] = [
        MinuteUnit::M1,
        MinuteUnit::M3,
        MinuteUnit::M5,
        MinuteUnit::M10,
        MinuteUnit::M15,
        MinuteUnit::M30,
        MinuteUnit::M60,
        MinuteUnit::M240,
    ];

    pub fn minutes(&self) -> u32 {
        match self {
            MinuteUnit::M1 => 1,
            MinuteUnit::M3 => 3,
            MinuteUnit::M5 => 5,
            MinuteUnit::M10 => 10,
            MinuteUnit::M15 => 15,
            MinuteUnit::M30 => 30,
            MinuteUnit::M60 => 60,
            MinuteUnit::M240 => 240,
        }
    }

    /// Snap an arbitrary minute count to the closest supported unit
    ///
    /// Ties resolve to the smaller unit.
    pub fn nearest(minutes: u32) -> Self {
        let mut best = MinuteUnit::M1;
        for unit in Self::ALL {
            if unit.minutes().abs_diff(minutes) < best.minutes().abs_diff(minutes) {
                best = unit;
            }
        }
        best
    }
}

/// Qualify a symbol with the quote currency unless it already names a market
pub fn normalize_market(symbol: &str, quote: &str) -> String {
    let s = symbol.trim().to_uppercase();
    if s.contains('-') {
        s
    } else {
        format!("{}-{}", quote.to_uppercase(), s)
    }
}

/// Bare coin symbol of a market or symbol (`KRW-BTC` -> `BTC`)
pub fn coin_symbol(symbol: &str) -> String {
    let s = symbol.trim().to_uppercase();
    match s.rsplit_once('-') {
        Some((_, coin)) => coin.to_string(),
        None => s,
    }
}

/// Read-only market data feed
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest trade price for one market
    async fn current_price(&self, market: &str) -> Result<f64, PriceError>;

    /// Daily candle for `date`, falling back to the latest daily candle
    async fn daily_candle(&self, market: &str, date: NaiveDate)
        -> Result<Option<Candle>, PriceError>;

    /// Recent minute candles, most recent first
    async fn minute_candles(
        &self,
        market: &str,
        unit: MinuteUnit,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<Candle>, PriceError>;

    /// Live tickers for many markets; one row per requested market
    async fn batch_ticker(&self, markets: &[String]) -> Vec<TickerQuote>;

    /// Source name for logging
    fn name(&self) -> &'static str;
}
