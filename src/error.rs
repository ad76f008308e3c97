//! Error types for the trading agent

use thiserror::Error;

use crate::paper_trading::TradeError;
use crate::prices::PriceError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Trade error: {0}")]
    Trade(#[from] TradeError),

    #[error("Price source error: {0}")]
    Price(#[from] PriceError),
}

pub type Result<T> = std::result::Result<T, Error>;
