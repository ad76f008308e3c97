//! Upbit public quotation API client

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{coin_symbol, Candle, MinuteUnit, PriceError, PriceSource, TickerQuote, MAX_TICKER_BATCH};
use crate::config::Settings;

/// Ticker item as returned by `/v1/ticker`
#[derive(Debug, Deserialize)]
struct UpbitTicker {
    market: String,
    trade_price: Option<f64>,
    signed_change_rate: Option<f64>,
    acc_trade_price_24h: Option<f64>,
}

/// Candle item as returned by `/v1/candles/*`
#[derive(Debug, Deserialize)]
struct UpbitCandle {
    candle_date_time_kst: Option<String>,
    candle_date_time_utc: Option<String>,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

impl From<UpbitCandle> for Candle {
    fn from(c: UpbitCandle) -> Self {
        Candle {
            time: c.candle_date_time_kst.or(c.candle_date_time_utc),
            open: c.opening_price,
            high: c.high_price,
            low: c.low_price,
            close: c.trade_price,
            volume: c.candle_acc_trade_volume,
        }
    }
}

impl From<UpbitTicker> for TickerQuote {
    fn from(t: UpbitTicker) -> Self {
        TickerQuote {
            symbol: coin_symbol(&t.market),
            market: t.market,
            trade_price: t.trade_price,
            signed_change_rate: t.signed_change_rate,
            acc_trade_price_24h: t.acc_trade_price_24h,
            status: "ok".to_string(),
        }
    }
}

/// Price source backed by the Upbit REST quotation endpoints
#[derive(Clone)]
pub struct UpbitClient {
    client: Client,
    base_url: String,
}

impl UpbitClient {
    /// Create a client using the configured base URL and request timeout
    pub fn new(settings: &Settings) -> Result<Self, PriceError> {
        let client = Client::builder().timeout(settings.http_timeout).build()?;
        Ok(Self {
            client,
            base_url: settings.api_base.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, PriceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PriceError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let text = response.text().await?;
        serde_json::from_str::<T>(&text).map_err(|e| PriceError::Decode(e.to_string()))
    }

    async fn daily_candles(
        &self,
        market: &str,
        to: Option<String>,
    ) -> Result<Option<Candle>, PriceError> {
        let mut query = vec![("market", market.to_string()), ("count", "1".to_string())];
        if let Some(to) = to {
            query.push(("to", to));
        }
        let candles: Vec<UpbitCandle> = self.get_json("/v1/candles/days", &query).await?;
        Ok(candles.into_iter().next().map(Candle::from))
    }

    async fn ticker_batch(&self, batch: &[String]) -> Vec<TickerQuote> {
        let query = [("markets", batch.join(","))];
        match self.get_json::<Vec<UpbitTicker>>("/v1/ticker", &query).await {
            Ok(items) => rows_for_batch(batch, items),
            Err(PriceError::Status { status, .. }) => {
                tracing::warn!(status = status, markets = batch.len(), "Ticker batch rejected");
                batch
                    .iter()
                    .map(|m| TickerQuote::failed(m, format!("http_{}", status)))
                    .collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, markets = batch.len(), "Ticker batch failed");
                batch.iter().map(|m| TickerQuote::failed(m, "error")).collect()
            }
        }
    }
}

/// Match a batch response to the requested markets
///
/// Markets the exchange silently dropped (delisted, wrong quote) get an
/// `unavailable` row so callers see one row per request.
fn rows_for_batch(requested: &[String], items: Vec<UpbitTicker>) -> Vec<TickerQuote> {
    let mut rows: Vec<TickerQuote> = items.into_iter().map(TickerQuote::from).collect();
    for market in requested {
        if !rows.iter().any(|r| &r.market == market) {
            rows.push(TickerQuote::failed(market, "unavailable"));
        }
    }
    rows
}

#[async_trait]
impl PriceSource for UpbitClient {
    async fn current_price(&self, market: &str) -> Result<f64, PriceError> {
        let query = [("markets", market.to_string())];
        let items: Vec<UpbitTicker> = self.get_json("/v1/ticker", &query).await?;
        items
            .into_iter()
            .next()
            .and_then(|t| t.trade_price)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| PriceError::Empty {
                market: market.to_string(),
            })
    }

    async fn daily_candle(
        &self,
        market: &str,
        date: NaiveDate,
    ) -> Result<Option<Candle>, PriceError> {
        let to = format!("{} 23:59:59", date.format("%Y-%m-%d"));
        match self.daily_candles(market, Some(to)).await {
            Ok(Some(candle)) => return Ok(Some(candle)),
            Ok(None) => {
                tracing::debug!(market = market, date = %date, "No daily candle for date, using latest");
            }
            Err(e) => {
                tracing::debug!(market = market, date = %date, error = %e, "Dated candle request failed, using latest");
            }
        }
        self.daily_candles(market, None).await
    }

    async fn minute_candles(
        &self,
        market: &str,
        unit: MinuteUnit,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<Candle>, PriceError> {
        let path = format!("/v1/candles/minutes/{}", unit.minutes());
        let mut query = vec![("market", market.to_string()), ("count", count.to_string())];
        if let Some(to) = to {
            query.push(("to", to.to_string()));
        }
        let candles: Vec<UpbitCandle> = self.get_json(&path, &query).await?;
        Ok(candles.into_iter().map(Candle::from).collect())
    }

    async fn batch_ticker(&self, markets: &[String]) -> Vec<TickerQuote> {
        let batches = markets.chunks(MAX_TICKER_BATCH).map(|b| self.ticker_batch(b));
        join_all(batches).await.into_iter().flatten().collect()
    }

    fn name(&self) -> &'static str {
        "upbit"
    }
}
