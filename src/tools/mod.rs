//! Tool implementations for the trading agent
//!
//! Tools take a typed JSON input (described to the LLM with a JSON schema)
//! and return a JSON value. Business rejections such as insufficient funds
//! are ordinary `Ok` results carrying an `error` field so the agent loop can
//! reason about them; only faults like a failed ledger write are `Err`.

mod audit;
mod prices;
mod trade;

pub use audit::{AuditEntry, AuditLog};
pub use prices::{PriceAction, PriceInput, PriceTool};
pub use trade::{TradeAction, TradeInput, TradeTool};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::paper_trading::PaperBroker;
use crate::prices::PriceSource;

pub const TOOL_TRADE: &str = "upbit/trade";
pub const TOOL_PRICE: &str = "upbit/price";

/// A tool callable by the agent loop
#[async_trait]
pub trait AgentTool: Send + Sync {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    type Input: DeserializeOwned + JsonSchema + Send;

    async fn execute(&self, args: Self::Input) -> Result<Value>;

    /// JSON schema of [`AgentTool::Input`]
    fn input_schema() -> Value {
        schemars::schema_for!(Self::Input).to_value()
    }

    fn spec() -> ToolSpec {
        ToolSpec {
            name: Self::NAME.to_string(),
            description: Self::DESCRIPTION.to_string(),
            input_schema: Self::input_schema(),
        }
    }

    /// Decode raw JSON arguments and execute
    async fn call(&self, args: Value) -> Result<Value> {
        let input: Self::Input = serde_json::from_value(args)
            .map_err(|e| Error::InvalidArgument(format!("{}: {}", Self::NAME, e)))?;
        self.execute(input).await
    }
}

/// Name, description and input schema of one tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Every tool the agent can call
pub fn catalog() -> Vec<ToolSpec> {
    vec![TradeTool::spec(), PriceTool::spec()]
}

/// Routes tool calls by name and records each one in the audit log
pub struct Toolbox {
    trade: TradeTool,
    price: PriceTool,
    audit: AuditLog,
}

impl Toolbox {
    pub fn new(settings: Arc<Settings>, prices: Arc<dyn PriceSource>) -> Self {
        let audit = AuditLog::new(&settings);
        let broker = PaperBroker::new(settings.clone(), prices.clone());
        Self {
            trade: TradeTool::new(broker),
            price: PriceTool::new(&settings, prices),
            audit,
        }
    }

    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value> {
        let start = Instant::now();
        let result = match name {
            TOOL_TRADE => self.trade.call(args.clone()).await,
            TOOL_PRICE => self.price.call(args.clone()).await,
            other => Err(Error::InvalidArgument(format!("unknown tool {:?}", other))),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(tool = name, duration_ms = duration_ms, ok = result.is_ok(), "Tool call finished");
        self.audit.record(name, &args, &result, duration_ms).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(schema: &Value) -> Vec<String> {
        let action = &schema["properties"]["action"];
        let resolved = match action.get("$ref").and_then(|r| r.as_str()) {
            Some(reference) => {
                let name = reference.rsplit('/').next().unwrap_or_default();
                schema
                    .get("$defs")
                    .or_else(|| schema.get("definitions"))
                    .and_then(|defs| defs.get(name))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            None => action.clone(),
        };
        let mut names = Vec::new();
        if let Some(values) = resolved.get("enum").and_then(|v| v.as_array()) {
            names.extend(values.iter().filter_map(|v| v.as_str().map(String::from)));
        }
        if let Some(variants) = resolved.get("oneOf").and_then(|v| v.as_array()) {
            for variant in variants {
                if let Some(value) = variant.get("const").and_then(|v| v.as_str()) {
                    names.push(value.to_string());
                }
                if let Some(values) = variant.get("enum").and_then(|v| v.as_array()) {
                    names.extend(values.iter().filter_map(|v| v.as_str().map(String::from)));
                }
            }
        }
        names
    }

    #[test]
    fn catalog_lists_both_tools_with_schemas() {
        let specs = catalog();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![TOOL_TRADE, TOOL_PRICE]);
        for spec in &specs {
            assert_eq!(spec.input_schema["type"], "object");
            assert!(!spec.description.is_empty());
        }
    }

    #[test]
    fn trade_schema_exposes_actions() {
        let schema = TradeTool::input_schema();
        assert!(schema["properties"]["symbol"].is_object());
        assert!(schema["properties"]["price"].is_object());
        let mut found = actions(&schema);
        found.sort();
        assert_eq!(found, vec!["buy", "get_balance", "sell"]);
    }

    #[test]
    fn price_schema_exposes_actions() {
        let mut found = actions(&PriceTool::input_schema());
        found.sort();
        assert_eq!(found, vec!["price_local", "price_minutes", "ticker_batch"]);
    }
}
