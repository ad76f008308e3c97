//! Read-only dashboard queries
//!
//! Projections over the account ledgers plus live and historical valuation
//! from the price source. Nothing here writes to a ledger or takes a writer
//! lock, and every query degrades to an empty or `None` result instead of
//! failing when an account has no data or a price lookup fails.

mod cache;

pub use cache::TtlCache;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::config::Settings;
use crate::paper_trading::{read_records, Ledger, Snapshot};
use crate::prices::{normalize_market, PriceSource, TickerQuote};

const METRICS_DIR: &str = "metrics";
const METRICS_FILE: &str = "metrics.jsonl";
const LOG_DIR: &str = "log";
const LOG_FILE: &str = "log.jsonl";

/// One row of the cross-account summary
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub account: String,
    pub last_id: Option<u64>,
    pub date: Option<String>,
    pub timestamp: Option<String>,
    pub cash: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub held_coins: Vec<String>,
}

/// Equity of one snapshot valued at that day's close
#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub id: u64,
    pub date: String,
    pub timestamp: String,
    pub action: &'static str,
    pub cash: f64,
    pub holdings_value: f64,
    pub equity: f64,
    pub realized_pnl: f64,
}

/// One open position valued at the live price
#[derive(Debug, Clone, Serialize)]
pub struct HoldingValuation {
    pub symbol: String,
    pub market: String,
    pub quantity: f64,
    pub avg_cost: f64,
    /// Live price, `None` when the ticker was unavailable
    pub price: Option<f64>,
    pub signed_change_rate: Option<f64>,
    pub value: f64,
    pub cost_basis: f64,
    pub unrealized_pnl: f64,
    /// Unrealized return in percent of cost basis
    pub pnl_rate: Option<f64>,
    pub status: String,
}

/// Live valuation of an account's latest snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HoldingsReport {
    pub account: String,
    pub snapshot_id: u64,
    pub date: String,
    pub cash: f64,
    pub holdings: Vec<HoldingValuation>,
    pub holdings_value: f64,
    pub equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub start_cash: f64,
    /// Equity minus starting cash
    pub total_pnl: f64,
    /// Total PnL in percent of starting cash
    pub return_pct: Option<f64>,
}

/// Query layer shared by the CLI and any HTTP front end
#[derive(Clone)]
pub struct Dashboard {
    ledger: Ledger,
    prices: Arc<dyn PriceSource>,
    quote_currency: String,
    start_cash: f64,
    tickers: TtlCache<String, TickerQuote>,
    daily_closes: TtlCache<(String, NaiveDate), f64>,
}

impl Dashboard {
    pub fn new(settings: &Settings, prices: Arc<dyn PriceSource>) -> Self {
        Self {
            ledger: Ledger::new(settings.data_root.clone()),
            prices,
            quote_currency: settings.quote_currency.clone(),
            start_cash: settings.start_cash,
            tickers: TtlCache::new(settings.ticker_cache_ttl),
            daily_closes: TtlCache::new(settings.daily_price_cache_ttl),
        }
    }

    /// Override the baseline used for return calculations
    pub fn with_start_cash(mut self, start_cash: f64) -> Self {
        self.start_cash = start_cash;
        self
    }

    pub fn list_accounts(&self) -> Vec<String> {
        self.ledger.accounts()
    }

    /// Latest cash and holdings for every account
    pub fn summary(&self) -> Vec<AccountSummary> {
        self.list_accounts()
            .into_iter()
            .map(|account| match self.latest(&account) {
                Some(snap) => AccountSummary {
                    held_coins: snap.holdings().map(|(s, _)| s.to_string()).collect(),
                    last_id: Some(snap.id),
                    cash: Some(snap.cash()),
                    realized_pnl: Some(snap.realized_pnl),
                    date: Some(snap.date),
                    timestamp: Some(snap.timestamp),
                    account,
                },
                None => AccountSummary {
                    account,
                    last_id: None,
                    date: None,
                    timestamp: None,
                    cash: None,
                    realized_pnl: None,
                    held_coins: Vec::new(),
                },
            })
            .collect()
    }

    /// Snapshot with the greatest id
    pub fn latest(&self, account: &str) -> Option<Snapshot> {
        self.ledger.latest(account)
    }

    /// The last `limit` records in file order
    pub fn history(&self, account: &str, limit: usize) -> Vec<Snapshot> {
        tail(self.ledger.read_all(account), limit)
    }

    /// Equity per snapshot, valuing holdings at each snapshot date's close
    ///
    /// A close that cannot be fetched contributes zero.
    pub async fn portfolio_timeseries(&self, account: &str, limit: usize) -> Vec<EquityPoint> {
        let snapshots = self.history(account, limit);
        let mut memo: HashMap<(String, NaiveDate), f64> = HashMap::new();
        let mut points = Vec::with_capacity(snapshots.len());

        for snap in snapshots {
            let date = NaiveDate::parse_from_str(&snap.date, "%Y-%m-%d").ok();
            let mut holdings_value = 0.0;
            for (symbol, qty) in snap.holdings() {
                let price = match date {
                    Some(date) => {
                        let market = normalize_market(symbol, &self.quote_currency);
                        let key = (market, date);
                        match memo.get(&key) {
                            Some(price) => *price,
                            None => {
                                let price = self.daily_close(&key.0, date).await;
                                memo.insert(key, price);
                                price
                            }
                        }
                    }
                    None => {
                        tracing::warn!(account = account, id = snap.id, date = %snap.date, "Unparseable snapshot date");
                        0.0
                    }
                };
                holdings_value += qty * price;
            }
            let cash = snap.cash();
            points.push(EquityPoint {
                id: snap.id,
                action: snap.this_action.name(),
                cash,
                holdings_value,
                equity: cash + holdings_value,
                realized_pnl: snap.realized_pnl,
                date: snap.date,
                timestamp: snap.timestamp,
            });
        }
        let purged = self.daily_closes.purge_expired().await;
        if purged > 0 {
            tracing::debug!(
                purged = purged,
                remaining = self.daily_closes.len().await,
                "Purged expired daily closes"
            );
        }
        points
    }

    async fn daily_close(&self, market: &str, date: NaiveDate) -> f64 {
        let key = (market.to_string(), date);
        if let Some(close) = self.daily_closes.get(&key).await {
            tracing::debug!(market = market, date = %date, "Daily close cache hit");
            return close;
        }
        match self.prices.daily_candle(market, date).await {
            Ok(Some(candle)) if candle.close.is_finite() && candle.close > 0.0 => {
                self.daily_closes.insert(key, candle.close).await;
                candle.close
            }
            Ok(_) => {
                tracing::warn!(market = market, date = %date, "No daily close, valuing at zero");
                0.0
            }
            Err(e) => {
                tracing::warn!(market = market, date = %date, error = %e, "Daily close fetch failed, valuing at zero");
                0.0
            }
        }
    }

    /// Live tickers for `markets`, served from the short TTL cache when fresh
    pub async fn live_tickers(&self, markets: &[String]) -> HashMap<String, TickerQuote> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        for market in markets {
            match self.tickers.get(market).await {
                Some(row) => {
                    found.insert(market.clone(), row);
                }
                None => missing.push(market.clone()),
            }
        }
        if missing.is_empty() {
            tracing::debug!(markets = markets.len(), "Ticker cache hit");
            return found;
        }

        for row in self.prices.batch_ticker(&missing).await {
            if row.price().is_some() {
                self.tickers.insert(row.market.clone(), row.clone()).await;
            }
            found.insert(row.market.clone(), row);
        }
        self.tickers.purge_expired().await;
        found
    }

    /// Latest holdings valued at live prices, with account-level PnL
    pub async fn holdings_with_prices(&self, account: &str) -> Option<HoldingsReport> {
        let snap = self.latest(account)?;
        let held: Vec<(String, String, f64)> = snap
            .holdings()
            .map(|(symbol, qty)| {
                (
                    symbol.to_string(),
                    normalize_market(symbol, &self.quote_currency),
                    qty,
                )
            })
            .collect();
        let markets: Vec<String> = held.iter().map(|(_, m, _)| m.clone()).collect();
        let tickers = if markets.is_empty() {
            HashMap::new()
        } else {
            self.live_tickers(&markets).await
        };

        let mut holdings = Vec::with_capacity(held.len());
        for (symbol, market, quantity) in held {
            let avg_cost = snap.avg_costs.get(&symbol).copied().unwrap_or(0.0);
            let row = tickers.get(&market);
            let price = row.and_then(TickerQuote::price);
            let status = row
                .map(|r| r.status.clone())
                .unwrap_or_else(|| "unavailable".to_string());
            let cost_basis = avg_cost * quantity;
            let value = price.map(|p| p * quantity).unwrap_or(0.0);
            let unrealized_pnl = price.map(|_| value - cost_basis).unwrap_or(0.0);
            let pnl_rate = match price {
                Some(p) if avg_cost > 0.0 => Some((p / avg_cost - 1.0) * 100.0),
                _ => None,
            };
            if price.is_none() {
                tracing::warn!(account = account, market = %market, status = %status, "No live price for holding");
            }
            holdings.push(HoldingValuation {
                symbol,
                market,
                quantity,
                avg_cost,
                price,
                signed_change_rate: row.and_then(|r| r.signed_change_rate),
                value,
                cost_basis,
                unrealized_pnl,
                pnl_rate,
                status,
            });
        }

        let cash = snap.cash();
        let holdings_value: f64 = holdings.iter().map(|h| h.value).sum();
        let unrealized_pnl: f64 = holdings.iter().map(|h| h.unrealized_pnl).sum();
        let equity = cash + holdings_value;
        let total_pnl = equity - self.start_cash;
        let return_pct = (self.start_cash > 0.0).then(|| total_pnl / self.start_cash * 100.0);

        Some(HoldingsReport {
            account: account.to_string(),
            snapshot_id: snap.id,
            date: snap.date,
            cash,
            holdings,
            holdings_value,
            equity,
            realized_pnl: snap.realized_pnl,
            unrealized_pnl,
            start_cash: self.start_cash,
            total_pnl,
            return_pct,
        })
    }

    fn account_path(&self, account: &str, parts: &[&str]) -> Option<PathBuf> {
        let mut path = self.ledger.account_dir(account).ok()?;
        for part in parts {
            path.push(part);
        }
        Some(path)
    }

    /// The last `limit` metrics records in file order
    pub fn metrics(&self, account: &str, limit: usize) -> Vec<Value> {
        match self.account_path(account, &[METRICS_DIR, METRICS_FILE]) {
            Some(path) => tail(read_records(&path), limit),
            None => Vec::new(),
        }
    }

    pub fn latest_metrics(&self, account: &str) -> Option<Value> {
        self.metrics(account, 1).pop()
    }

    /// Dates with a tool log, oldest first
    pub fn log_dates(&self, account: &str) -> Vec<String> {
        let Some(dir) = self.account_path(account, &[LOG_DIR]) else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut dates: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(LOG_FILE).is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok())
            .collect();
        dates.sort();
        dates
    }

    /// The last `limit` tool log records of one day
    pub fn log_records(&self, account: &str, date: &str, limit: usize) -> Vec<Value> {
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Vec::new();
        }
        match self.account_path(account, &[LOG_DIR, date, LOG_FILE]) {
            Some(path) => tail(read_records(&path), limit),
            None => Vec::new(),
        }
    }

    /// Quantity per symbol across all accounts' latest snapshots
    pub fn aggregate_holdings(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for account in self.list_accounts() {
            if let Some(snap) = self.latest(&account) {
                for (symbol, qty) in snap.holdings() {
                    *totals.entry(symbol.to_string()).or_insert(0.0) += qty;
                }
            }
        }
        totals
    }
}

fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}
