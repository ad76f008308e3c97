//! Paper trading module
//!
//! Simulated order execution against a per-account append-only ledger:
//! - Fill prices come from the live [`PriceSource`] for market orders
//! - Limit orders fill at their limit price
//! - Every committed trade appends exactly one snapshot
//! - Rejected orders write nothing
//!
//! The broker holds the account's writer lock from reading the current state
//! until the new snapshot is appended, so concurrent orders on one account
//! are serialized and never share an `id`.

mod ledger;
mod portfolio;
pub mod snapshot;

pub use ledger::{CurrentState, Ledger, LedgerError, LedgerWriter};
pub use portfolio::{
    apply, BuySizing, PortfolioState, TradeIntent, Transition, REALIZED_PNL_INCLUDES_FEES,
};
pub use snapshot::{Action, AvgCosts, Positions, Snapshot, SnapshotDraft, CASH};

pub(crate) use ledger::read_records;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Settings;
use crate::prices::{coin_symbol, normalize_market, PriceSource};

/// Order failures
///
/// Everything except [`TradeError::Storage`] is a business rejection that
/// left the ledger untouched.
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("No usable price for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("Insufficient cash to buy {symbol}: have {cash:.2}, need {required:.2} including fee {fee:.2}")]
    InsufficientFunds {
        symbol: String,
        cash: f64,
        required: f64,
        fee: f64,
        fee_rate: f64,
    },

    #[error("Insufficient {symbol} to sell: have {have}, want {want}")]
    InsufficientPosition { symbol: String, have: f64, want: f64 },

    #[error("Ledger write failed, trade not committed: {0}")]
    Storage(LedgerError),
}

impl From<LedgerError> for TradeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidAccount(account) => {
                TradeError::Configuration(format!("invalid account signature {:?}", account))
            }
            other => TradeError::Storage(other),
        }
    }
}

impl TradeError {
    /// True when the order was refused and nothing was written
    pub fn is_rejection(&self) -> bool {
        !matches!(self, TradeError::Storage(_))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            TradeError::Configuration(_) => "configuration",
            TradeError::InvalidOrder(_) => "invalid_order",
            TradeError::PriceUnavailable { .. } => "price_unavailable",
            TradeError::InsufficientFunds { .. } => "insufficient_funds",
            TradeError::InsufficientPosition { .. } => "insufficient_position",
            TradeError::Storage(_) => "storage",
        }
    }

    /// Structured payload for callers that report errors verbatim
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        let details = match self {
            TradeError::PriceUnavailable { symbol } => json!({ "symbol": symbol }),
            TradeError::InsufficientFunds {
                symbol,
                cash,
                required,
                fee,
                fee_rate,
            } => json!({
                "symbol": symbol,
                "cash": cash,
                "required": required,
                "fee": fee,
                "fee_rate": fee_rate,
            }),
            TradeError::InsufficientPosition { symbol, have, want } => json!({
                "symbol": symbol,
                "have": have,
                "want": want,
            }),
            _ => Value::Null,
        };
        if let (Some(obj), Value::Object(extra)) = (body.as_object_mut(), details) {
            obj.extend(extra);
        }
        body
    }
}

/// A buy request
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOrder {
    /// Spend a quote-currency amount at the live price
    Market { symbol: String, spend: f64 },
    /// Buy a quantity at a fixed price
    Limit {
        symbol: String,
        quantity: f64,
        price: f64,
    },
}

impl BuyOrder {
    pub fn market(symbol: impl Into<String>, spend: f64) -> Self {
        BuyOrder::Market {
            symbol: symbol.into(),
            spend,
        }
    }

    pub fn limit(symbol: impl Into<String>, quantity: f64, price: f64) -> Self {
        BuyOrder::Limit {
            symbol: symbol.into(),
            quantity,
            price,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            BuyOrder::Market { symbol, .. } | BuyOrder::Limit { symbol, .. } => symbol,
        }
    }
}

/// A sell request; `price: None` sells at the live price
#[derive(Debug, Clone, PartialEq)]
pub struct SellOrder {
    pub symbol: String,
    pub quantity: f64,
    pub price: Option<f64>,
}

impl SellOrder {
    pub fn market(symbol: impl Into<String>, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            price: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            price: Some(price),
        }
    }
}

/// A committed trade
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    /// Always true; replaces polling a shared "trade happened" flag
    pub trade_executed: bool,
    /// Fully qualified market the order was priced on
    pub market: String,
    pub snapshot: Snapshot,
}

impl TradeOutcome {
    pub fn action(&self) -> &Action {
        &self.snapshot.this_action
    }

    pub fn to_json(&self) -> Value {
        json!({
            "trade_executed": self.trade_executed,
            "market": self.market,
            "order_result": self.snapshot.this_action,
            "snapshot": self.snapshot,
            "avg_costs": self.snapshot.avg_costs,
            "realized_pnl": self.snapshot.realized_pnl,
        })
    }
}

/// Current balances of an account
#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub account: String,
    pub last_id: Option<u64>,
    pub cash: f64,
    pub balances: Positions,
    pub held_coins: Vec<String>,
    pub avg_costs: AvgCosts,
    pub realized_pnl: f64,
}

impl Balance {
    pub fn to_json(&self) -> Value {
        json!({
            "account": self.account,
            "last_id": self.last_id,
            "cash": self.cash,
            "balances": self.balances,
            "held_coins": self.held_coins,
            "avg_costs": self.avg_costs,
            "realized_pnl": self.realized_pnl,
        })
    }
}

/// Executes paper orders for any number of accounts
#[derive(Clone)]
pub struct PaperBroker {
    settings: Arc<Settings>,
    prices: Arc<dyn PriceSource>,
    ledger: Ledger,
}

impl PaperBroker {
    pub fn new(settings: Arc<Settings>, prices: Arc<dyn PriceSource>) -> Self {
        let ledger = Ledger::new(settings.data_root.clone());
        Self {
            settings,
            prices,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn trading_date(&self) -> String {
        self.settings.trading_date().format("%Y-%m-%d").to_string()
    }

    /// Lock the account and seed its ledger if this is its first use
    async fn open(&self, account: &str) -> Result<LedgerWriter, TradeError> {
        if account.trim().is_empty() {
            return Err(TradeError::Configuration(
                "account signature is not set".to_string(),
            ));
        }
        let writer = self.ledger.writer(account).await?;
        writer.bootstrap_if_missing(self.settings.trading_date(), self.settings.start_cash)?;
        Ok(writer)
    }

    async fn fill_price(&self, market: &str) -> Result<f64, TradeError> {
        match self.prices.current_price(market).await {
            Ok(price) if price.is_finite() && price > 0.0 => Ok(price),
            Ok(price) => {
                tracing::warn!(market = market, price = price, "Price source returned unusable price");
                Err(TradeError::PriceUnavailable {
                    symbol: market.to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(market = market, source = self.prices.name(), error = %e, "Price fetch failed");
                Err(TradeError::PriceUnavailable {
                    symbol: market.to_string(),
                })
            }
        }
    }

    fn commit(
        &self,
        writer: &LedgerWriter,
        market: String,
        transition: Transition,
    ) -> Result<TradeOutcome, TradeError> {
        let Transition { state, action } = transition;
        let snapshot = writer.append(SnapshotDraft {
            date: self.trading_date(),
            this_action: action,
            positions: state.positions,
            avg_costs: state.avg_costs,
            realized_pnl: state.realized_pnl,
        })?;
        tracing::info!(
            account = writer.account(),
            market = %market,
            id = snapshot.id,
            action = snapshot.this_action.name(),
            cash = snapshot.cash(),
            "Paper trade committed"
        );
        Ok(TradeOutcome {
            trade_executed: true,
            market,
            snapshot,
        })
    }

    /// Execute a buy and append the resulting snapshot
    pub async fn buy(&self, account: &str, order: BuyOrder) -> Result<TradeOutcome, TradeError> {
        let market = normalize_market(order.symbol(), &self.settings.quote_currency);
        let symbol = coin_symbol(&market);

        // Reject malformed orders before touching the ledger or the network.
        portfolio::check_symbol(&symbol)?;
        match &order {
            BuyOrder::Market { spend, .. } => portfolio::positive(*spend, "quote amount")?,
            BuyOrder::Limit {
                quantity, price, ..
            } => {
                portfolio::positive(*quantity, "quantity")?;
                portfolio::positive(*price, "limit price")?;
            }
        }

        let writer = self.open(account).await?;
        let state = PortfolioState::from(writer.read_current());

        let sizing = match order {
            BuyOrder::Market { spend, .. } => BuySizing::Quote {
                amount: spend,
                fill_price: self.fill_price(&market).await?,
            },
            BuyOrder::Limit {
                quantity, price, ..
            } => BuySizing::Limit { quantity, price },
        };
        let intent = TradeIntent::Buy {
            symbol,
            sizing,
            fee_rate: self.settings.fee_rate,
        };

        let transition = apply(&state, &intent).inspect_err(|e| {
            tracing::info!(account = account, market = %market, reason = %e, "Buy rejected");
        })?;
        self.commit(&writer, market, transition)
    }

    /// Execute a sell and append the resulting snapshot
    ///
    /// The position is checked before any price is fetched.
    pub async fn sell(&self, account: &str, order: SellOrder) -> Result<TradeOutcome, TradeError> {
        let market = normalize_market(&order.symbol, &self.settings.quote_currency);
        let symbol = coin_symbol(&market);
        let market_order = order.price.is_none();

        portfolio::check_symbol(&symbol)?;
        portfolio::positive(order.quantity, "quantity")?;
        if let Some(price) = order.price {
            portfolio::positive(price, "limit price")?;
        }

        let writer = self.open(account).await?;
        let state = PortfolioState::from(writer.read_current());

        let have = state.quantity(&symbol);
        if order.quantity > have {
            tracing::info!(account = account, market = %market, have = have, want = order.quantity, "Sell rejected");
            return Err(TradeError::InsufficientPosition {
                symbol,
                have,
                want: order.quantity,
            });
        }

        let fill_price = match order.price {
            Some(price) => price,
            None => self.fill_price(&market).await?,
        };
        let intent = TradeIntent::Sell {
            symbol,
            quantity: order.quantity,
            fill_price,
            fee_rate: self.settings.fee_rate,
            market_order,
        };
        let transition = apply(&state, &intent)?;
        self.commit(&writer, market, transition)
    }

    /// Current balances, bootstrapping the account on first use
    pub async fn get_balance(&self, account: &str) -> Result<Balance, TradeError> {
        let writer = self.open(account).await?;
        let state = writer.read_current();
        drop(writer);

        let held_coins = snapshot::held(&state.positions)
            .map(|(symbol, _)| symbol.to_string())
            .collect();
        Ok(Balance {
            account: account.to_string(),
            last_id: state.last_id,
            cash: state.cash(),
            held_coins,
            balances: state.positions,
            avg_costs: state.avg_costs,
            realized_pnl: state.realized_pnl,
        })
    }

    /// Record externally observed balances as a passive `snapshot` record
    ///
    /// Average costs and realized PnL carry forward. A missing `CASH` entry
    /// keeps the previous cash; a symbol synced to zero gets its average
    /// cost reset.
    pub async fn sync_snapshot(
        &self,
        account: &str,
        observed: Positions,
    ) -> Result<Snapshot, TradeError> {
        if let Some((symbol, qty)) = observed
            .iter()
            .find(|(_, qty)| !qty.is_finite() || **qty < 0.0)
        {
            return Err(TradeError::InvalidOrder(format!(
                "observed {} quantity must be non-negative, got {}",
                symbol, qty
            )));
        }

        let writer = self.open(account).await?;
        let prev = PortfolioState::from(writer.read_current());

        let mut positions = Positions::new();
        for (symbol, qty) in observed {
            positions.insert(coin_symbol(&symbol), qty);
        }
        positions
            .entry(CASH.to_string())
            .or_insert_with(|| prev.cash());

        let mut avg_costs = prev.avg_costs;
        for (symbol, cost) in avg_costs.iter_mut() {
            if positions.get(symbol).copied().unwrap_or(0.0) <= 0.0 {
                *cost = 0.0;
            }
        }

        let snapshot = writer.append(SnapshotDraft {
            date: self.trading_date(),
            this_action: Action::sync(),
            positions,
            avg_costs,
            realized_pnl: prev.realized_pnl,
        })?;
        tracing::info!(account = account, id = snapshot.id, "Synced external balances");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prices::{Candle, MinuteUnit, PriceError, TickerQuote};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct StubPrices {
        prices: HashMap<String, f64>,
        calls: AtomicUsize,
        latency: Option<Duration>,
    }

    impl StubPrices {
        fn with(prices: &[(&str, f64)]) -> Self {
            Self {
                prices: prices.iter().map(|(m, p)| (m.to_string(), *p)).collect(),
                calls: AtomicUsize::new(0),
                latency: None,
            }
        }

        fn slow(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }
    }

    #[async_trait]
    impl PriceSource for StubPrices {
        async fn current_price(&self, market: &str) -> Result<f64, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.prices.get(market).copied().ok_or(PriceError::Empty {
                market: market.to_string(),
            })
        }

        async fn daily_candle(
            &self,
            _market: &str,
            _date: NaiveDate,
        ) -> Result<Option<Candle>, PriceError> {
            Ok(None)
        }

        async fn minute_candles(
            &self,
            _market: &str,
            _unit: MinuteUnit,
            _count: u32,
            _to: Option<&str>,
        ) -> Result<Vec<Candle>, PriceError> {
            Ok(Vec::new())
        }

        async fn batch_ticker(&self, markets: &[String]) -> Vec<TickerQuote> {
            markets.iter().map(|m| TickerQuote::failed(m, "error")).collect()
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn broker(dir: &TempDir, prices: StubPrices) -> (PaperBroker, Arc<StubPrices>) {
        let settings = Settings {
            data_root: dir.path().to_path_buf(),
            start_cash: 1_000_000.0,
            fee_rate: 0.0005,
            today_date: NaiveDate::from_ymd_opt(2025, 1, 2),
            ..Settings::default()
        };
        let prices = Arc::new(prices);
        (PaperBroker::new(Arc::new(settings), prices.clone()), prices)
    }

    #[tokio::test]
    async fn market_buy_then_sell_matches_worked_example() {
        let dir = TempDir::new().unwrap();
        let (broker, prices) = broker(&dir, StubPrices::with(&[("KRW-X", 1_000.0)]));

        let bought = broker.buy("acct", BuyOrder::market("x", 100_000.0)).await.unwrap();
        assert!(bought.trade_executed);
        assert_eq!(bought.market, "KRW-X");
        assert_eq!(bought.snapshot.id, 1);
        assert_eq!(bought.snapshot.cash(), 899_950.0);
        assert_eq!(bought.snapshot.positions["X"], 100.0);
        assert_eq!(bought.snapshot.avg_costs["X"], 1_000.0);
        assert_eq!(bought.snapshot.date, "2025-01-02");

        let sold = broker
            .sell("acct", SellOrder::limit("KRW-X", 50.0, 1_200.0))
            .await
            .unwrap();
        assert_eq!(sold.snapshot.id, 2);
        assert_eq!(sold.snapshot.cash(), 959_920.0);
        assert_eq!(sold.snapshot.realized_pnl, 10_000.0);
        assert_eq!(prices.calls.load(Ordering::SeqCst), 1);

        let value = sold.to_json();
        assert_eq!(value["order_result"]["action"], "sell");
        assert_eq!(value["realized_pnl"], 10_000.0);
    }

    #[tokio::test]
    async fn rejected_buy_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (broker, _) = broker(&dir, StubPrices::with(&[("KRW-X", 1_000.0)]));
        broker.buy("acct", BuyOrder::market("X", 100_000.0)).await.unwrap();

        let err = broker
            .buy("acct", BuyOrder::market("X", 2_000_000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::InsufficientFunds { .. }));
        assert!(err.is_rejection());
        assert_eq!(err.to_json()["code"], "insufficient_funds");
        assert_eq!(err.to_json()["cash"], 899_950.0);
        assert_eq!(broker.ledger().read_current("acct").last_id, Some(1));
    }

    #[tokio::test]
    async fn oversell_is_rejected_before_pricing() {
        let dir = TempDir::new().unwrap();
        let (broker, prices) = broker(&dir, StubPrices::with(&[("KRW-X", 1_000.0)]));
        broker.buy("acct", BuyOrder::limit("X", 50.0, 1_000.0)).await.unwrap();

        let err = broker
            .sell("acct", SellOrder::market("X", 200.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradeError::InsufficientPosition { have, want, .. } if have == 50.0 && want == 200.0
        ));
        assert_eq!(prices.calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.ledger().read_current("acct").last_id, Some(1));
    }

    #[tokio::test]
    async fn missing_price_fails_market_orders_only() {
        let dir = TempDir::new().unwrap();
        let (broker, _) = broker(&dir, StubPrices::default());

        let err = broker
            .buy("acct", BuyOrder::market("ETH", 10_000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::PriceUnavailable { ref symbol } if symbol == "KRW-ETH"));
        // Bootstrap happened, the failed trade did not.
        assert_eq!(broker.ledger().read_current("acct").last_id, Some(0));

        let ok = broker.buy("acct", BuyOrder::limit("ETH", 1.0, 10_000.0)).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn invalid_orders_touch_nothing() {
        let dir = TempDir::new().unwrap();
        let (broker, _) = broker(&dir, StubPrices::default());
        let err = broker
            .buy("acct", BuyOrder::market("X", -1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::InvalidOrder(_)));
        assert!(!broker.ledger().exists("acct"));
    }

    #[tokio::test]
    async fn blank_or_path_like_account_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let (broker, _) = broker(&dir, StubPrices::default());
        for account in ["", "../escape"] {
            let err = broker.get_balance(account).await.unwrap_err();
            assert!(matches!(err, TradeError::Configuration(_)), "{}", account);
        }
    }

    #[tokio::test]
    async fn balance_bootstraps_and_lists_held_coins() {
        let dir = TempDir::new().unwrap();
        let (broker, _) = broker(&dir, StubPrices::default());

        let balance = broker.get_balance("acct").await.unwrap();
        assert_eq!(balance.last_id, Some(0));
        assert_eq!(balance.cash, 1_000_000.0);
        assert!(balance.held_coins.is_empty());

        broker.buy("acct", BuyOrder::limit("BTC", 0.5, 100_000.0)).await.unwrap();
        broker.buy("acct", BuyOrder::limit("ETH", 1.0, 10_000.0)).await.unwrap();
        broker.sell("acct", SellOrder::limit("ETH", 1.0, 10_000.0)).await.unwrap();

        let balance = broker.get_balance("acct").await.unwrap();
        assert_eq!(balance.held_coins, vec!["BTC"]);
        assert_eq!(balance.avg_costs["ETH"], 0.0);
        assert_eq!(balance.last_id, Some(3));

        let init: Vec<_> = broker
            .ledger()
            .read_all("acct")
            .into_iter()
            .filter(|s| s.this_action.name() == "init")
            .collect();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].id, 0);
    }

    #[tokio::test]
    async fn sync_snapshot_carries_costs_forward() {
        let dir = TempDir::new().unwrap();
        let (broker, _) = broker(&dir, StubPrices::default());
        broker.buy("acct", BuyOrder::limit("BTC", 1.0, 100.0)).await.unwrap();
        broker.buy("acct", BuyOrder::limit("ETH", 1.0, 10.0)).await.unwrap();

        let mut observed = Positions::new();
        observed.insert("KRW-BTC".to_string(), 2.0);
        observed.insert("ETH".to_string(), 0.0);
        let snap = broker.sync_snapshot("acct", observed).await.unwrap();

        assert_eq!(snap.this_action.name(), "snapshot");
        assert_eq!(snap.positions["BTC"], 2.0);
        assert_eq!(snap.avg_costs["BTC"], 100.0);
        assert_eq!(snap.avg_costs["ETH"], 0.0);
        assert!(snap.cash() > 0.0);

        let mut bad = Positions::new();
        bad.insert("BTC".to_string(), -1.0);
        assert!(matches!(
            broker.sync_snapshot("acct", bad).await,
            Err(TradeError::InvalidOrder(_))
        ));
    }

    /// Concurrent orders on one account are serialized by the writer lock:
    /// every commit gets its own id and no update is lost.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buys_are_serialized_per_account() {
        let dir = TempDir::new().unwrap();
        let (broker, _) = broker(&dir, StubPrices::with(&[("KRW-X", 100.0)]));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                broker.buy("acct", BuyOrder::market("X", 1_000.0)).await
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().snapshot.id);
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());

        let state = broker.ledger().read_current("acct");
        assert!((state.positions["X"] - 200.0).abs() < 1e-9);
        assert!((state.cash() - (1_000_000.0 - 20.0 * 1_000.5)).abs() < 1e-6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn brokers_on_one_data_root_do_not_lose_updates() {
        let dir = TempDir::new().unwrap();
        let (first, _) = broker(
            &dir,
            StubPrices::with(&[("KRW-X", 100.0)]).slow(Duration::from_millis(20)),
        );
        let (second, _) = broker(
            &dir,
            StubPrices::with(&[("KRW-X", 100.0)]).slow(Duration::from_millis(20)),
        );

        let (a, b) = tokio::join!(
            first.buy("acct", BuyOrder::market("X", 1_000.0)),
            second.buy("acct", BuyOrder::market("X", 1_000.0)),
        );
        let mut ids = vec![a.unwrap().snapshot.id, b.unwrap().snapshot.id];
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        let state = first.ledger().read_current("acct");
        assert!((state.positions["X"] - 20.0).abs() < 1e-9);
        assert!((state.cash() - (1_000_000.0 - 2.0 * 1_000.5)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unwritable_data_root_is_a_storage_failure() {
        let dir = TempDir::new().unwrap();
        let file_root = dir.path().join("not-a-dir");
        std::fs::write(&file_root, b"occupied").unwrap();
        let settings = Settings {
            data_root: file_root,
            start_cash: 1_000_000.0,
            today_date: NaiveDate::from_ymd_opt(2025, 1, 2),
            ..Settings::default()
        };
        let broker = PaperBroker::new(
            Arc::new(settings),
            Arc::new(StubPrices::with(&[("KRW-X", 100.0)])),
        );

        let err = broker
            .buy("acct", BuyOrder::market("X", 1_000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Storage(_)));
        assert!(!err.is_rejection());
        assert_eq!(err.code(), "storage");
        assert!(broker.ledger().read_all("acct").is_empty());
    }
}
