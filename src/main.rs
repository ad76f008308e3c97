//! Upbit Trading Agent CLI
//!
//! Command-line interface for paper trading, price lookups and dashboard
//! queries.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use upbit_trading_agent::paper_trading::Positions;
use upbit_trading_agent::tools::{AgentTool, PriceTool, TOOL_PRICE};
use upbit_trading_agent::{
    catalog, AppConfig, BuyOrder, Dashboard, Error, PaperBroker, PriceSource, Result, SellOrder,
    Settings, Toolbox, UpbitClient,
};

#[derive(Parser)]
#[command(name = "trading-agent")]
#[command(about = "LLM-driven paper trading agent for Upbit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to run config file (models, agent type, initial cash)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Account signature, overriding SIGNATURE
    #[arg(short, long, global = true)]
    account: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,

    /// List agent tools with their input schemas
    Tools,

    /// Invoke an agent tool with JSON arguments
    Call {
        /// Tool name (e.g. upbit/trade)
        tool: String,

        /// Arguments as JSON
        #[arg(default_value = "{}")]
        args: String,
    },

    /// Show the account's balances
    Balance,

    /// Buy at the live price (--spend) or at a limit (--amount and --price)
    Buy {
        /// Coin symbol or market (BTC, KRW-BTC)
        symbol: String,

        /// Quote amount to spend at the live price
        #[arg(long, conflicts_with_all = ["amount", "price"])]
        spend: Option<f64>,

        /// Quantity for a limit buy
        #[arg(long, requires = "price")]
        amount: Option<f64>,

        /// Limit price
        #[arg(long, requires = "amount")]
        price: Option<f64>,
    },

    /// Sell at the live price, or at --price
    Sell {
        /// Coin symbol or market
        symbol: String,

        /// Quantity to sell
        amount: f64,

        /// Limit price
        #[arg(long)]
        price: Option<f64>,
    },

    /// Record externally observed balances as a snapshot
    Sync {
        /// Positions as a JSON object, e.g. '{"CASH": 1000, "BTC": 0.1}'
        positions: String,
    },

    /// Daily candle for a date (default: trading date)
    Price {
        symbol: String,

        /// YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },

    /// Recent minute candles
    Minutes {
        symbol: String,

        /// Candle size in minutes
        #[arg(long)]
        unit: Option<u32>,

        /// Number of candles
        #[arg(long)]
        count: Option<u32>,
    },

    /// Live tickers for several symbols
    Tickers {
        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// Read-only dashboard queries
    Dashboard {
        #[command(subcommand)]
        view: DashboardView,
    },

    /// Bootstrap and report every enabled model of the run config
    Accounts,
}

#[derive(Subcommand)]
enum DashboardView {
    /// Accounts with a data directory
    Accounts,
    /// Latest cash and holdings per account
    Summary,
    /// Quantity per coin summed across accounts
    Aggregate,
    /// Latest snapshot of an account
    Latest { account: String },
    /// Most recent snapshots in ledger order
    History {
        account: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Equity per snapshot at daily closes
    Timeseries {
        account: String,
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
    /// Holdings valued at live prices
    Holdings { account: String },
    /// Metrics records
    Metrics {
        account: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Tool call logs; lists dates when --date is omitted
    Logs {
        account: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json()))
        .with((!cli.json_logs).then(fmt::layer))
        .with(filter)
        .init();

    let mut settings = Settings::from_env()?;
    if let Some(account) = cli.account {
        settings.signature = Some(account);
    }
    let settings = Arc::new(settings);

    let app_config = match cli.config {
        Some(path) => Some(AppConfig::load(&path)?),
        None => None,
    };

    let prices: Arc<dyn PriceSource> = Arc::new(UpbitClient::new(&settings)?);

    match cli.command {
        Commands::Config => {
            print_json(&json!({ "settings": &*settings, "run_config": app_config }))?;
        }
        Commands::Tools => {
            print_json(&serde_json::to_value(catalog())?)?;
        }
        Commands::Call { tool, args } => {
            let args: Value = serde_json::from_str(&args)
                .map_err(|e| Error::InvalidArgument(format!("tool args: {}", e)))?;
            let toolbox = Toolbox::new(settings.clone(), prices);
            print_json(&toolbox.dispatch(&tool, args).await?)?;
        }
        Commands::Balance => {
            let account = settings.require_signature()?;
            let broker = PaperBroker::new(settings.clone(), prices);
            print_json(&broker.get_balance(account).await?.to_json())?;
        }
        Commands::Buy {
            symbol,
            spend,
            amount,
            price,
        } => {
            let account = settings.require_signature()?;
            let order = match (spend, amount, price) {
                (Some(spend), _, _) => BuyOrder::market(symbol, spend),
                (None, Some(amount), Some(price)) => BuyOrder::limit(symbol, amount, price),
                _ => {
                    return Err(Error::InvalidArgument(
                        "pass --spend, or --amount with --price".to_string(),
                    ))
                }
            };
            let broker = PaperBroker::new(settings.clone(), prices);
            print_json(&broker.buy(account, order).await?.to_json())?;
        }
        Commands::Sell {
            symbol,
            amount,
            price,
        } => {
            let account = settings.require_signature()?;
            let order = match price {
                Some(price) => SellOrder::limit(symbol, amount, price),
                None => SellOrder::market(symbol, amount),
            };
            let broker = PaperBroker::new(settings.clone(), prices);
            print_json(&broker.sell(account, order).await?.to_json())?;
        }
        Commands::Sync { positions } => {
            let account = settings.require_signature()?;
            let observed: Positions = serde_json::from_str(&positions)
                .map_err(|e| Error::InvalidArgument(format!("positions: {}", e)))?;
            let broker = PaperBroker::new(settings.clone(), prices);
            let snapshot = broker.sync_snapshot(account, observed).await?;
            print_json(&serde_json::to_value(snapshot)?)?;
        }
        Commands::Price { symbol, date } => {
            let tool = PriceTool::new(&settings, prices);
            let args = json!({ "action": "price_local", "symbol": symbol, "date": date });
            print_json(&tool.call(args).await?)?;
        }
        Commands::Minutes {
            symbol,
            unit,
            count,
        } => {
            let tool = PriceTool::new(&settings, prices);
            let args = json!({
                "action": "price_minutes",
                "symbol": symbol,
                "unit": unit,
                "count": count,
            });
            print_json(&tool.call(args).await?)?;
        }
        Commands::Tickers { symbols } => {
            let tool = PriceTool::new(&settings, prices);
            tracing::debug!(tool = TOOL_PRICE, symbols = symbols.len(), "Fetching tickers");
            let args = json!({ "action": "ticker_batch", "symbols": symbols });
            print_json(&tool.call(args).await?)?;
        }
        Commands::Dashboard { view } => {
            let mut dashboard = Dashboard::new(&settings, prices);
            if let Some(app) = &app_config {
                dashboard = dashboard.with_start_cash(app.initial_cash(&settings));
            }
            run_dashboard(&dashboard, view).await?;
        }
        Commands::Accounts => {
            let app = app_config.ok_or_else(|| {
                Error::Config("accounts requires --config <run config>".to_string())
            })?;
            run_accounts(settings, prices, app).await?;
        }
    }

    Ok(())
}

async fn run_dashboard(dashboard: &Dashboard, view: DashboardView) -> Result<()> {
    print_json(&dashboard_view(dashboard, view).await?)
}

/// Render one dashboard view; account views with nothing recorded are "not found"
async fn dashboard_view(dashboard: &Dashboard, view: DashboardView) -> Result<Value> {
    let value = match view {
        DashboardView::Accounts => json!(dashboard.list_accounts()),
        DashboardView::Summary => serde_json::to_value(dashboard.summary())?,
        DashboardView::Aggregate => json!(dashboard.aggregate_holdings()),
        DashboardView::Latest { account } => match dashboard.latest(&account) {
            Some(snapshot) => serde_json::to_value(snapshot)?,
            None => not_found(&account),
        },
        DashboardView::History { account, limit } => {
            found_or(&account, dashboard.history(&account, limit))?
        }
        DashboardView::Timeseries { account, limit } => {
            found_or(&account, dashboard.portfolio_timeseries(&account, limit).await)?
        }
        DashboardView::Holdings { account } => {
            match dashboard.holdings_with_prices(&account).await {
                Some(report) => serde_json::to_value(report)?,
                None => not_found(&account),
            }
        }
        DashboardView::Metrics { account, limit } => {
            found_or(&account, dashboard.metrics(&account, limit))?
        }
        DashboardView::Logs {
            account,
            date,
            limit,
        } => match date {
            Some(date) => found_or(&account, dashboard.log_records(&account, &date, limit))?,
            None => found_or(&account, dashboard.log_dates(&account))?,
        },
    };
    Ok(value)
}

async fn run_accounts(
    settings: Arc<Settings>,
    prices: Arc<dyn PriceSource>,
    app: AppConfig,
) -> Result<()> {
    tracing::info!(
        agent_type = app.agent_type.name(),
        models = app.models.len(),
        "Preparing accounts"
    );

    let broker = PaperBroker::new(settings.clone(), prices.clone());
    let dashboard = Dashboard::new(&settings, prices).with_start_cash(app.initial_cash(&settings));

    let mut reports = Vec::new();
    for model in app.enabled_models() {
        let balance = broker.get_balance(&model.signature).await?;
        tracing::info!(
            model = %model.name,
            basemodel = %model.basemodel,
            account = %model.signature,
            cash = balance.cash,
            "Account ready"
        );
        let holdings = dashboard.holdings_with_prices(&model.signature).await;
        reports.push(json!({
            "name": model.name,
            "basemodel": model.basemodel,
            "signature": model.signature,
            "balance": balance.to_json(),
            "valuation": holdings,
        }));
    }
    print_json(&Value::Array(reports))
}

fn not_found(account: &str) -> Value {
    json!({ "error": "not found", "account": account })
}

fn found_or<T: serde::Serialize>(account: &str, items: Vec<T>) -> Result<Value> {
    if items.is_empty() {
        Ok(not_found(account))
    } else {
        Ok(serde_json::to_value(items)?)
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
