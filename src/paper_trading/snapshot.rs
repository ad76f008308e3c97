//! Ledger record types
//!
//! One [`Snapshot`] per line of `<data_root>/<account>/position/position.jsonl`:
//!
//! ```json
//! {"date":"2025-01-02","timestamp":"2025-01-02T10:00:00","id":1,
//!  "this_action":{"action":"buy","symbol":"BTC","amount":0.001,...},
//!  "positions":{"CASH":99899950.0,"BTC":0.001},
//!  "avg_costs":{"BTC":100000000.0},"realized_pnl":0.0}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reserved position key holding the quote-currency balance
pub const CASH: &str = "CASH";

/// Symbol -> quantity, including [`CASH`]
pub type Positions = BTreeMap<String, f64>;

/// Symbol -> volume-weighted average acquisition price
pub type AvgCosts = BTreeMap<String, f64>;

/// The action that produced a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// First record of every ledger
    Init {
        #[serde(default)]
        symbol: String,
        #[serde(default)]
        amount: f64,
        #[serde(default)]
        note: String,
    },
    Buy {
        symbol: String,
        /// Quantity acquired
        amount: f64,
        #[serde(default)]
        market_order: bool,
        /// Gross quote-currency cost before fee
        #[serde(rename = "krw_spent")]
        gross_cost: f64,
        /// Total cash outflow (gross cost + fee)
        #[serde(default)]
        net_cash_flow: f64,
        fee: f64,
        fee_rate: f64,
        fill_price: f64,
    },
    Sell {
        symbol: String,
        /// Quantity disposed
        amount: f64,
        #[serde(default)]
        market_order: bool,
        /// Gross quote-currency proceeds before fee
        #[serde(rename = "proceeds_krw")]
        gross_proceeds: f64,
        /// Total cash inflow (gross proceeds - fee)
        #[serde(default)]
        net_cash_flow: f64,
        fee: f64,
        fee_rate: f64,
        fill_price: f64,
    },
    /// Passive sync of externally observed balances
    Snapshot {
        #[serde(default)]
        symbol: String,
        #[serde(default)]
        amount: f64,
    },
}

impl Action {
    pub fn init() -> Self {
        Action::Init {
            symbol: String::new(),
            amount: 0.0,
            note: "paper trading init".to_string(),
        }
    }

    pub fn sync() -> Self {
        Action::Snapshot {
            symbol: String::new(),
            amount: 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Init { .. } => "init",
            Action::Buy { .. } => "buy",
            Action::Sell { .. } => "sell",
            Action::Snapshot { .. } => "snapshot",
        }
    }
}

/// Snapshot contents before the ledger assigns `id` and `timestamp`
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDraft {
    pub date: String,
    pub this_action: Action,
    pub positions: Positions,
    pub avg_costs: AvgCosts,
    pub realized_pnl: f64,
}

/// One immutable ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: String,
    /// Creation time in exchange local time (`YYYY-MM-DDTHH:MM:SS`)
    #[serde(default)]
    pub timestamp: String,
    pub id: u64,
    pub this_action: Action,
    pub positions: Positions,
    #[serde(default)]
    pub avg_costs: AvgCosts,
    #[serde(default)]
    pub realized_pnl: f64,
}

impl Snapshot {
    pub fn cash(&self) -> f64 {
        self.positions.get(CASH).copied().unwrap_or(0.0)
    }

    /// Non-cash holdings with a positive quantity
    pub fn holdings(&self) -> impl Iterator<Item = (&str, f64)> {
        held(&self.positions)
    }
}

/// Non-cash entries of a position map with a positive quantity
pub fn held(positions: &Positions) -> impl Iterator<Item = (&str, f64)> {
    positions
        .iter()
        .filter(|(symbol, qty)| symbol.as_str() != CASH && **qty > 0.0)
        .map(|(symbol, qty)| (symbol.as_str(), *qty))
}
