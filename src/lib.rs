//! Upbit Paper Trading Agent
//!
//! Building blocks for an LLM-driven trading agent on the Upbit exchange:
//! - Read market data from the Upbit public REST API
//! - Execute paper orders against a per-account append-only ledger
//! - Expose trading and price lookups as JSON tools for the agent loop
//! - Query positions, equity and PnL for a dashboard
//!
//! # Ledger Model
//!
//! - Every state change appends one snapshot line; nothing is rewritten
//! - The current state of an account is its snapshot with the greatest id
//! - One writer per account at a time, any number of readers
//! - Torn or malformed lines are skipped on read

pub mod config;
pub mod dashboard;
pub mod paper_trading;
pub mod prices;
pub mod tools;

mod error;

// Re-export commonly used types
pub use config::{AgentKind, AppConfig, ModelConfig, Settings};
pub use dashboard::Dashboard;
pub use error::{Error, Result};
pub use paper_trading::{BuyOrder, PaperBroker, SellOrder, TradeError, TradeOutcome};
pub use prices::{PriceSource, UpbitClient};
pub use tools::{catalog, Toolbox};
