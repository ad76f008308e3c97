//! Position accounting
//!
//! Pure state transitions from one ledger state to the next. Nothing here
//! touches the filesystem or the network; the broker feeds in the previous
//! state and a fill price and persists whatever comes back.

use serde::Serialize;

use super::ledger::CurrentState;
use super::snapshot::{Action, AvgCosts, Positions, CASH};
use super::TradeError;

/// Whether realized PnL is booked from net proceeds (after fee) instead of
/// the gross fill price. Fees always reduce cash either way.
pub const REALIZED_PNL_INCLUDES_FEES: bool = false;

/// Accounting state carried from one snapshot to the next
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioState {
    pub positions: Positions,
    pub avg_costs: AvgCosts,
    pub realized_pnl: f64,
}

impl PortfolioState {
    /// Fresh account holding only cash
    pub fn with_cash(cash: f64) -> Self {
        let mut positions = Positions::new();
        positions.insert(CASH.to_string(), cash);
        Self {
            positions,
            ..Self::default()
        }
    }

    pub fn cash(&self) -> f64 {
        self.quantity(CASH)
    }

    pub fn quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn avg_cost(&self, symbol: &str) -> f64 {
        self.avg_costs.get(symbol).copied().unwrap_or(0.0)
    }
}

impl From<CurrentState> for PortfolioState {
    fn from(state: CurrentState) -> Self {
        Self {
            positions: state.positions,
            avg_costs: state.avg_costs,
            realized_pnl: state.realized_pnl,
        }
    }
}

/// How a buy is sized
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuySizing {
    /// Spend a quote-currency amount at the market fill price
    Quote { amount: f64, fill_price: f64 },
    /// Buy a quantity at a limit price, which is also the fill price
    Limit { quantity: f64, price: f64 },
}

/// A trade to apply against a [`PortfolioState`]
#[derive(Debug, Clone, PartialEq)]
pub enum TradeIntent {
    Buy {
        symbol: String,
        sizing: BuySizing,
        fee_rate: f64,
    },
    Sell {
        symbol: String,
        quantity: f64,
        fill_price: f64,
        fee_rate: f64,
        market_order: bool,
    },
}

/// Result of applying an intent: the next state and the action to record
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PortfolioState,
    pub action: Action,
}

/// Apply a trade to the previous state
///
/// Rejections leave `prev` untouched and produce no transition.
pub fn apply(prev: &PortfolioState, intent: &TradeIntent) -> Result<Transition, TradeError> {
    match intent {
        TradeIntent::Buy {
            symbol,
            sizing,
            fee_rate,
        } => apply_buy(prev, symbol, *sizing, *fee_rate),
        TradeIntent::Sell {
            symbol,
            quantity,
            fill_price,
            fee_rate,
            market_order,
        } => apply_sell(prev, symbol, *quantity, *fill_price, *fee_rate, *market_order),
    }
}

fn apply_buy(
    prev: &PortfolioState,
    symbol: &str,
    sizing: BuySizing,
    fee_rate: f64,
) -> Result<Transition, TradeError> {
    check_symbol(symbol)?;
    check_fee_rate(fee_rate)?;

    let (quantity, gross_cost, fill_price, market_order) = match sizing {
        BuySizing::Quote { amount, fill_price } => {
            positive(amount, "quote amount")?;
            positive(fill_price, "fill price")?;
            (amount / fill_price, amount, fill_price, true)
        }
        BuySizing::Limit { quantity, price } => {
            positive(quantity, "quantity")?;
            positive(price, "limit price")?;
            (quantity, quantity * price, price, false)
        }
    };

    let fee = gross_cost * fee_rate;
    let total_cost = gross_cost + fee;
    let cash = prev.cash();
    if total_cost > cash {
        return Err(TradeError::InsufficientFunds {
            symbol: symbol.to_string(),
            cash,
            required: total_cost,
            fee,
            fee_rate,
        });
    }

    let old_qty = prev.quantity(symbol);
    let new_qty = old_qty + quantity;
    let avg_cost = if new_qty > 0.0 {
        (prev.avg_cost(symbol) * old_qty + fill_price * quantity) / new_qty
    } else {
        fill_price
    };

    let mut next = prev.clone();
    next.positions.insert(CASH.to_string(), cash - total_cost);
    next.positions.insert(symbol.to_string(), new_qty);
    next.avg_costs.insert(symbol.to_string(), avg_cost);

    Ok(Transition {
        state: next,
        action: Action::Buy {
            symbol: symbol.to_string(),
            amount: quantity,
            market_order,
            gross_cost,
            net_cash_flow: total_cost,
            fee,
            fee_rate,
            fill_price,
        },
    })
}

fn apply_sell(
    prev: &PortfolioState,
    symbol: &str,
    quantity: f64,
    fill_price: f64,
    fee_rate: f64,
    market_order: bool,
) -> Result<Transition, TradeError> {
    check_symbol(symbol)?;
    check_fee_rate(fee_rate)?;
    positive(quantity, "quantity")?;
    positive(fill_price, "fill price")?;

    let have = prev.quantity(symbol);
    if quantity > have {
        return Err(TradeError::InsufficientPosition {
            symbol: symbol.to_string(),
            have,
            want: quantity,
        });
    }

    let gross_proceeds = quantity * fill_price;
    let fee = gross_proceeds * fee_rate;
    let net_proceeds = gross_proceeds - fee;
    let basis = prev.avg_cost(symbol) * quantity;
    let pnl = if REALIZED_PNL_INCLUDES_FEES {
        net_proceeds - basis
    } else {
        gross_proceeds - basis
    };

    let remaining = have - quantity;
    let mut next = prev.clone();
    next.positions.insert(symbol.to_string(), remaining);
    next.positions.insert(CASH.to_string(), prev.cash() + net_proceeds);
    next.realized_pnl += pnl;
    if remaining <= 0.0 {
        next.avg_costs.insert(symbol.to_string(), 0.0);
    }

    Ok(Transition {
        state: next,
        action: Action::Sell {
            symbol: symbol.to_string(),
            amount: quantity,
            market_order,
            gross_proceeds,
            net_cash_flow: net_proceeds,
            fee,
            fee_rate,
            fill_price,
        },
    })
}

pub(super) fn check_symbol(symbol: &str) -> Result<(), TradeError> {
    if symbol.is_empty() || symbol == CASH {
        return Err(TradeError::InvalidOrder(format!(
            "cannot trade symbol {:?}",
            symbol
        )));
    }
    Ok(())
}

fn check_fee_rate(fee_rate: f64) -> Result<(), TradeError> {
    if !fee_rate.is_finite() || fee_rate < 0.0 {
        return Err(TradeError::InvalidOrder(format!(
            "fee rate must be a non-negative number, got {}",
            fee_rate
        )));
    }
    Ok(())
}

pub(super) fn positive(value: f64, what: &str) -> Result<(), TradeError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(TradeError::InvalidOrder(format!(
            "{} must be a positive number, got {}",
            what, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEE: f64 = 0.0005;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
    }

    fn market_buy(symbol: &str, amount: f64, fill_price: f64) -> TradeIntent {
        TradeIntent::Buy {
            symbol: symbol.to_string(),
            sizing: BuySizing::Quote { amount, fill_price },
            fee_rate: FEE,
        }
    }

    fn sell(symbol: &str, quantity: f64, fill_price: f64) -> TradeIntent {
        TradeIntent::Sell {
            symbol: symbol.to_string(),
            quantity,
            fill_price,
            fee_rate: FEE,
            market_order: true,
        }
    }

    fn scenario_a() -> PortfolioState {
        let start = PortfolioState::with_cash(1_000_000.0);
        apply(&start, &market_buy("X", 100_000.0, 1_000.0))
            .unwrap()
            .state
    }

    #[test]
    fn market_buy_sizes_by_quote_amount() {
        let start = PortfolioState::with_cash(1_000_000.0);
        let t = apply(&start, &market_buy("X", 100_000.0, 1_000.0)).unwrap();
        assert_eq!(t.state.quantity("X"), 100.0);
        assert_eq!(t.state.cash(), 899_950.0);
        assert_eq!(t.state.avg_cost("X"), 1_000.0);
        assert_eq!(t.state.realized_pnl, 0.0);
        match t.action {
            Action::Buy {
                fee,
                net_cash_flow,
                gross_cost,
                market_order,
                ..
            } => {
                assert_eq!(fee, 50.0);
                assert_eq!(gross_cost, 100_000.0);
                assert_eq!(net_cash_flow, 100_050.0);
                assert!(market_order);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn sell_books_gross_realized_pnl() {
        let t = apply(&scenario_a(), &sell("X", 50.0, 1_200.0)).unwrap();
        assert_eq!(t.state.quantity("X"), 50.0);
        assert_eq!(t.state.cash(), 959_920.0);
        assert_eq!(t.state.realized_pnl, 10_000.0);
        assert_eq!(t.state.avg_cost("X"), 1_000.0);
        match t.action {
            Action::Sell {
                gross_proceeds,
                fee,
                net_cash_flow,
                ..
            } => {
                assert_eq!(gross_proceeds, 60_000.0);
                assert_eq!(fee, 30.0);
                assert_eq!(net_cash_flow, 59_970.0);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn realized_pnl_excludes_fees() {
        assert!(!REALIZED_PNL_INCLUDES_FEES);
        let t = apply(&scenario_a(), &sell("X", 10.0, 1_000.0)).unwrap();
        // Selling at cost realizes nothing even though a fee was paid.
        assert_eq!(t.state.realized_pnl, 0.0);
        assert_eq!(t.state.cash(), 899_950.0 + 10_000.0 - 5.0);
    }

    #[test]
    fn buy_beyond_cash_is_rejected() {
        let prev = scenario_a();
        let err = apply(&prev, &market_buy("X", 2_000_000.0, 1_000.0)).unwrap_err();
        match err {
            TradeError::InsufficientFunds {
                cash,
                required,
                fee,
                ..
            } => {
                assert_eq!(cash, 899_950.0);
                assert_eq!(fee, 1_000.0);
                assert_eq!(required, 2_001_000.0);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn sell_beyond_position_is_rejected() {
        let prev = apply(&scenario_a(), &sell("X", 50.0, 1_200.0)).unwrap().state;
        let err = apply(&prev, &sell("X", 200.0, 1_200.0)).unwrap_err();
        assert!(matches!(
            err,
            TradeError::InsufficientPosition { have, want, .. } if have == 50.0 && want == 200.0
        ));
        let err = apply(&prev, &sell("NEVER", 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientPosition { have, .. } if have == 0.0));
    }

    #[test]
    fn fee_can_push_buy_over_cash() {
        let prev = PortfolioState::with_cash(100_000.0);
        assert!(apply(&prev, &market_buy("X", 100_000.0, 10.0)).is_err());
        assert!(apply(&prev, &market_buy("X", 99_950.0, 10.0)).is_ok());
    }

    #[test]
    fn average_cost_is_weighted_mean() {
        let start = PortfolioState::with_cash(10_000_000.0);
        let limit = |quantity, price| TradeIntent::Buy {
            symbol: "ETH".to_string(),
            sizing: BuySizing::Limit { quantity, price },
            fee_rate: FEE,
        };
        let s1 = apply(&start, &limit(2.0, 1_000.0)).unwrap().state;
        let t2 = apply(&s1, &limit(3.0, 2_000.0)).unwrap();
        let expected = (2.0 * 1_000.0 + 3.0 * 2_000.0) / 5.0;
        assert!(close(t2.state.avg_cost("ETH"), expected));
        assert_eq!(t2.state.quantity("ETH"), 5.0);
        assert!(matches!(t2.action, Action::Buy { market_order: false, fill_price, .. } if fill_price == 2_000.0));
    }

    #[test]
    fn closing_position_resets_average_cost() {
        let t = apply(&scenario_a(), &sell("X", 100.0, 900.0)).unwrap();
        assert_eq!(t.state.quantity("X"), 0.0);
        assert_eq!(t.state.avg_cost("X"), 0.0);
        assert_eq!(t.state.realized_pnl, -10_000.0);

        let reopened = apply(&t.state, &market_buy("X", 5_000.0, 500.0)).unwrap();
        assert_eq!(reopened.state.avg_cost("X"), 500.0);
    }

    #[test]
    fn rejects_degenerate_orders() {
        let prev = scenario_a();
        for intent in [
            market_buy("X", 0.0, 1.0),
            market_buy("X", -5.0, 1.0),
            market_buy("X", 10.0, f64::NAN),
            market_buy("X", f64::INFINITY, 1.0),
            market_buy(CASH, 10.0, 1.0),
            market_buy("", 10.0, 1.0),
            sell("X", 0.0, 1.0),
            sell("X", 1.0, 0.0),
        ] {
            assert!(matches!(
                apply(&prev, &intent),
                Err(TradeError::InvalidOrder(_))
            ));
        }
    }

    /// Book equity identity: cash + cost basis of open positions equals
    /// starting cash plus realized PnL minus fees. Nothing is created.
    #[test]
    fn value_is_conserved_across_trades() {
        let initial = 5_000_000.0;
        let mut state = PortfolioState::with_cash(initial);
        let mut fees = 0.0;
        let mut seed: u64 = 0x2545_f491;
        let symbols = ["A", "B", "C"];

        for step in 0..400 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let symbol = symbols[(seed >> 33) as usize % symbols.len()];
            let price = 100.0 + ((seed >> 20) % 10_000) as f64 / 7.0;
            let intent = if step % 3 == 0 {
                sell(symbol, state.quantity(symbol) * 0.6 + 0.5, price)
            } else {
                market_buy(symbol, ((seed >> 40) % 400_000) as f64 + 1.0, price)
            };
            let Ok(t) = apply(&state, &intent) else {
                continue;
            };
            let (cash_delta, qty_delta, fill, fee) = match &t.action {
                Action::Buy { amount, fill_price, fee, .. } => {
                    (t.state.cash() - state.cash(), *amount, *fill_price, *fee)
                }
                Action::Sell { amount, fill_price, fee, .. } => {
                    (t.state.cash() - state.cash(), -*amount, *fill_price, *fee)
                }
                other => panic!("unexpected action {:?}", other),
            };
            assert!(close(cash_delta + qty_delta * fill, -fee));
            fees += fee;
            state = t.state;

            for (sym, qty) in &state.positions {
                assert!(*qty >= 0.0, "{} went negative", sym);
            }
        }

        let book: f64 = symbols
            .iter()
            .map(|s| state.quantity(s) * state.avg_cost(s))
            .sum();
        assert!(close(state.cash() + book, initial + state.realized_pnl - fees));
    }
}
