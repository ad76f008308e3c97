//! Paper trade tool
//!
//! Buy, sell and balance queries against the configured account's ledger:
//! - Market buys spend the quote amount given in `price` at the live price
//! - Limit buys take a quantity in `amount` and a price in `price`
//! - Sells take a quantity in `amount`, with `price` for limit orders
//!
//! Every successful trade response carries `trade_executed: true`.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AgentTool, TOOL_TRADE};
use crate::error::Result;
use crate::paper_trading::{BuyOrder, PaperBroker, SellOrder, TradeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    GetBalance,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TradeInput {
    pub action: TradeAction,
    /// Coin symbol (`BTC`) or market (`KRW-BTC`)
    pub symbol: Option<String>,
    /// Quantity for limit buys and all sells
    pub amount: Option<f64>,
    /// Quote amount to spend for market buys, limit price otherwise
    pub price: Option<f64>,
    /// Execute at the live price (default true)
    #[serde(default = "default_market_order")]
    pub market_order: bool,
}

fn default_market_order() -> bool {
    true
}

/// Tool for paper buy/sell/balance operations
pub struct TradeTool {
    broker: PaperBroker,
    account: Option<String>,
}

impl TradeTool {
    /// Trade on behalf of the account named by the configured signature
    pub fn new(broker: PaperBroker) -> Self {
        let account = broker.settings().signature.clone();
        Self { broker, account }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    fn account(&self) -> std::result::Result<&str, TradeError> {
        self.account.as_deref().ok_or_else(|| {
            TradeError::Configuration("SIGNATURE is not set; no account to trade".to_string())
        })
    }

    async fn buy(&self, args: &TradeInput) -> std::result::Result<Value, TradeError> {
        let account = self.account()?;
        let symbol = require_symbol(args)?;
        let order = if args.market_order {
            let spend = args.price.ok_or_else(|| {
                TradeError::InvalidOrder(
                    "market buy requires `price`, the quote amount to spend".to_string(),
                )
            })?;
            BuyOrder::market(symbol, spend)
        } else {
            match (args.amount, args.price) {
                (Some(quantity), Some(price)) => BuyOrder::limit(symbol, quantity, price),
                _ => {
                    return Err(TradeError::InvalidOrder(
                        "limit buy requires both `amount` and `price`".to_string(),
                    ))
                }
            }
        };
        Ok(self.broker.buy(account, order).await?.to_json())
    }

    async fn sell(&self, args: &TradeInput) -> std::result::Result<Value, TradeError> {
        let account = self.account()?;
        let symbol = require_symbol(args)?;
        let quantity = args
            .amount
            .ok_or_else(|| TradeError::InvalidOrder("sell requires `amount`".to_string()))?;
        let order = if args.market_order {
            SellOrder::market(symbol, quantity)
        } else {
            let price = args.price.ok_or_else(|| {
                TradeError::InvalidOrder("limit sell requires `price`".to_string())
            })?;
            SellOrder::limit(symbol, quantity, price)
        };
        Ok(self.broker.sell(account, order).await?.to_json())
    }

    async fn get_balance(&self) -> std::result::Result<Value, TradeError> {
        let account = self.account()?;
        Ok(self.broker.get_balance(account).await?.to_json())
    }
}

fn require_symbol(args: &TradeInput) -> std::result::Result<&str, TradeError> {
    args.symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TradeError::InvalidOrder("missing `symbol`".to_string()))
}

#[async_trait]
impl AgentTool for TradeTool {
    const NAME: &'static str = TOOL_TRADE;
    const DESCRIPTION: &'static str = "Paper trading on the exchange. `buy` with market_order=true \
        spends `price` quote currency at the live price; with market_order=false it buys `amount` \
        units at limit `price`. `sell` disposes of `amount` units at the live or limit price. \
        `get_balance` returns cash, holdings, average costs and realized PnL.";
    type Input = TradeInput;

    async fn execute(&self, args: TradeInput) -> Result<Value> {
        let outcome = match args.action {
            TradeAction::Buy => self.buy(&args).await,
            TradeAction::Sell => self.sell(&args).await,
            TradeAction::GetBalance => self.get_balance().await,
        };
        match outcome {
            Ok(value) => Ok(value),
            Err(e) if e.is_rejection() => Ok(e.to_json()),
            Err(e) => Err(e.into()),
        }
    }
}
