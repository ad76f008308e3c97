//! Price lookup tool
//!
//! Read-only market data for the agent: the daily candle of the trading
//! date, recent minute candles, and live tickers for many symbols at once.
//! Upstream failures come back as `{"error": ...}` results.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{AgentTool, TOOL_PRICE};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::prices::{normalize_market, MinuteUnit, PriceSource};

/// Most candles the exchange returns per request
const MAX_CANDLES: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PriceAction {
    PriceLocal,
    PriceMinutes,
    TickerBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriceInput {
    pub action: PriceAction,
    /// Coin symbol or market for `price_local` and `price_minutes`
    pub symbol: Option<String>,
    /// Symbols or markets for `ticker_batch`
    #[serde(default)]
    pub symbols: Vec<String>,
    /// `YYYY-MM-DD`, defaults to the trading date
    pub date: Option<String>,
    /// Candle size in minutes, snapped to a supported unit
    pub unit: Option<u32>,
    /// Number of minute candles (1 to 200)
    pub count: Option<u32>,
    /// Upper time bound for minute candles
    pub to: Option<String>,
}

/// Tool for price and ticker queries
pub struct PriceTool {
    prices: Arc<dyn PriceSource>,
    quote_currency: String,
    trading_date: NaiveDate,
    bar_minutes: u32,
    bar_count: u32,
}

impl PriceTool {
    pub fn new(settings: &Settings, prices: Arc<dyn PriceSource>) -> Self {
        Self {
            prices,
            quote_currency: settings.quote_currency.clone(),
            trading_date: settings.trading_date(),
            bar_minutes: settings.bar_minutes,
            bar_count: settings.bar_count,
        }
    }

    fn market(&self, args: &PriceInput) -> Result<String> {
        args.symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| normalize_market(s, &self.quote_currency))
            .ok_or_else(|| Error::InvalidArgument("missing `symbol`".to_string()))
    }

    async fn price_local(&self, args: &PriceInput) -> Result<Value> {
        let market = self.market(args)?;
        let date = match args.date.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                Error::InvalidArgument(format!("`date` must be YYYY-MM-DD: {}", e))
            })?,
            None => self.trading_date,
        };
        let date_str = date.format("%Y-%m-%d").to_string();

        Ok(match self.prices.daily_candle(&market, date).await {
            Ok(Some(candle)) => json!({
                "action": "price_local",
                "market": market,
                "date": date_str,
                "ohlcv": candle,
            }),
            Ok(None) => json!({
                "error": "no daily candle",
                "market": market,
                "date": date_str,
            }),
            Err(e) => {
                tracing::warn!(market = %market, error = %e, "Daily candle lookup failed");
                json!({ "error": e.to_string(), "market": market, "date": date_str })
            }
        })
    }

    async fn price_minutes(&self, args: &PriceInput) -> Result<Value> {
        let market = self.market(args)?;
        let unit = MinuteUnit::nearest(args.unit.unwrap_or(self.bar_minutes));
        let count = args.count.unwrap_or(self.bar_count).clamp(1, MAX_CANDLES);

        Ok(
            match self
                .prices
                .minute_candles(&market, unit, count, args.to.as_deref())
                .await
            {
                Ok(candles) => json!({
                    "action": "price_minutes",
                    "market": market,
                    "unit": unit.minutes(),
                    "count": candles.len(),
                    "candles": candles,
                }),
                Err(e) => {
                    tracing::warn!(market = %market, unit = unit.minutes(), error = %e, "Minute candle lookup failed");
                    json!({ "error": e.to_string(), "market": market, "unit": unit.minutes() })
                }
            },
        )
    }

    async fn ticker_batch(&self, args: &PriceInput) -> Result<Value> {
        let mut seen = HashSet::new();
        let markets: Vec<String> = args
            .symbols
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| normalize_market(s, &self.quote_currency))
            .filter(|m| seen.insert(m.clone()))
            .collect();
        if markets.is_empty() {
            return Err(Error::InvalidArgument("`symbols` is empty".to_string()));
        }
        let rows = self.prices.batch_ticker(&markets).await;
        let ok = rows.iter().filter(|r| r.price().is_some()).count();
        Ok(json!({
            "action": "ticker_batch",
            "requested": markets.len(),
            "ok": ok,
            "rows": rows,
        }))
    }
}

#[async_trait]
impl AgentTool for PriceTool {
    const NAME: &'static str = TOOL_PRICE;
    const DESCRIPTION: &'static str = "Market data. `price_local` returns the daily OHLCV candle \
        of `date` (default: trading date) for `symbol`; `price_minutes` returns `count` recent \
        candles of `unit` minutes; `ticker_batch` returns live prices for `symbols`.";
    type Input = PriceInput;

    async fn execute(&self, args: PriceInput) -> Result<Value> {
        match args.action {
            PriceAction::PriceLocal => self.price_local(&args).await,
            PriceAction::PriceMinutes => self.price_minutes(&args).await,
            PriceAction::TickerBatch => self.ticker_batch(&args).await,
        }
    }
}
