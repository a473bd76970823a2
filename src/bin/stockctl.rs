//! Command surface over the market database.
//!
//! Usage:
//!   stockctl list
//!   stockctl price <TICKER>
//!   stockctl history <TICKER> [day|week|month|all]
//!   stockctl buy <PLAYER> <TICKER> <QTY>
//!   stockctl sell <PLAYER> <TICKER> <QTY>
//!   stockctl balance <PLAYER>
//!   stockctl grant <PLAYER> <AMOUNT>
//!   stockctl refresh

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;

use coinmarket::config::Config;
use coinmarket::db::Database;
use coinmarket::error::MarketError;
use coinmarket::ledger::Ledger;
use coinmarket::market::{HistoryWindow, MarketView};
use coinmarket::model::PlayerId;
use coinmarket::prices::PriceStore;
use coinmarket::registry::StockRegistry;
use coinmarket::scheduler::PriceRefreshScheduler;
use coinmarket::simulator::PriceSimulator;
use coinmarket::trading::{TradeReceipt, TradingEngine};

struct Ctl {
    cfg: Config,
    registry: StockRegistry,
    prices: PriceStore,
    market: MarketView,
    engine: TradingEngine,
}

impl Ctl {
    fn open() -> Result<Self> {
        let cfg = Config::from_env();
        let db = Arc::new(Database::open(&cfg.sqlite_path).context("open database")?);
        db.init()?;
        let registry = StockRegistry::new(db.clone());
        let prices = PriceStore::new(db.clone());
        let ledger = Arc::new(Ledger::new(db, cfg.starting_balance));
        Ok(Self {
            market: MarketView::new(registry.clone(), prices.clone()),
            engine: TradingEngine::new(registry.clone(), prices.clone(), ledger),
            registry,
            prices,
            cfg,
        })
    }
}

fn fmt_change(change: Option<f64>) -> String {
    match change {
        Some(c) => format!("{:+.2}%", c),
        None => "n/a".to_string(),
    }
}

fn print_receipt(r: &TradeReceipt) {
    println!(
        "{} {} {} @ {:.2} = {:.2} coins; balance {:.2}",
        r.side.as_str(),
        r.quantity,
        r.ticker,
        r.price,
        r.total,
        r.balance_after
    );
    match &r.holding_after {
        Some(h) => println!("holding {} shares, avg {:.2}", h.shares, h.average_price),
        None => println!("position closed"),
    }
}

fn player_arg(args: &[String], idx: usize) -> Result<PlayerId> {
    let raw = args.get(idx).ok_or_else(|| anyhow!("missing player id"))?;
    raw.parse().with_context(|| format!("bad player id {raw:?}"))
}

fn ticker_arg(args: &[String], idx: usize) -> Result<String> {
    args.get(idx)
        .map(|t| t.trim().to_uppercase())
        .ok_or_else(|| anyhow!("missing ticker"))
}

fn qty_arg(args: &[String], idx: usize) -> Result<i64> {
    let raw = args.get(idx).ok_or_else(|| anyhow!("missing quantity"))?;
    raw.parse().with_context(|| format!("bad quantity {raw:?}"))
}

fn usage() {
    println!("stockctl - coin market commands\n");
    println!("Commands:");
    println!("  list                            - Stocks with price and 24h/7d change");
    println!("  price <TICKER>                  - Latest price");
    println!("  history <TICKER> [day|week|month|all]");
    println!("  buy <PLAYER> <TICKER> <QTY>     - Buy whole shares");
    println!("  sell <PLAYER> <TICKER> <QTY>    - Sell whole shares");
    println!("  balance <PLAYER>                - Coins and marked positions");
    println!("  grant <PLAYER> <AMOUNT>         - Credit coins");
    println!("  refresh                         - Run one hourly refresh now");
}

async fn run(args: &[String]) -> Result<()> {
    let ctl = Ctl::open()?;
    let now = Utc::now();

    match args[1].as_str() {
        "list" => {
            println!("{:<8} {:<28} {:>10} {:>9} {:>9}", "TICKER", "COMPANY", "PRICE", "24H", "7D");
            for row in ctl.market.board(now)? {
                let price = row.price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "n/a".into());
                println!(
                    "{:<8} {:<28} {:>10} {:>9} {:>9}",
                    row.stock.ticker,
                    row.stock.company,
                    price,
                    fmt_change(row.change_24h),
                    fmt_change(row.change_7d)
                );
            }
        }
        "price" => {
            let (stock, point) = ctl.market.quote(&ticker_arg(args, 2)?)?;
            println!(
                "{} ({}): {:.2} at {}",
                stock.ticker,
                stock.company,
                point.price,
                point.timestamp.format("%Y-%m-%d %H:%M UTC")
            );
        }
        "history" => {
            let ticker = ticker_arg(args, 2)?;
            let window: HistoryWindow = match args.get(3) {
                Some(w) => w.parse().map_err(|e: String| anyhow!(e))?,
                None => HistoryWindow::All,
            };
            for p in ctl.market.history(&ticker, window, now)? {
                println!("{}\t{:.4}", p.timestamp.to_rfc3339(), p.price);
            }
        }
        "buy" => {
            let receipt = ctl
                .engine
                .buy(player_arg(args, 2)?, &ticker_arg(args, 3)?, qty_arg(args, 4)?)
                .await?;
            print_receipt(&receipt);
        }
        "sell" => {
            let receipt = ctl
                .engine
                .sell(player_arg(args, 2)?, &ticker_arg(args, 3)?, qty_arg(args, 4)?)
                .await?;
            print_receipt(&receipt);
        }
        "balance" => {
            let portfolio = ctl.engine.portfolio(player_arg(args, 2)?)?;
            println!("balance: {:.2} coins", portfolio.balance);
            for pos in &portfolio.positions {
                println!(
                    "  {:<8} {:>6} @ {:>8.2}  now {:>8}  pnl {:>8}",
                    pos.holding.ticker,
                    pos.holding.shares,
                    pos.holding.average_price,
                    pos.price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "n/a".into()),
                    pos.unrealized.map(|u| format!("{:+.2}", u)).unwrap_or_else(|| "n/a".into()),
                );
            }
            println!("net worth: {:.2}", portfolio.net_worth());
        }
        "grant" => {
            let player = player_arg(args, 2)?;
            let raw = args.get(3).ok_or_else(|| anyhow!("missing amount"))?;
            let amount: f64 = raw.parse().with_context(|| format!("bad amount {raw:?}"))?;
            let balance = ctl.engine.ledger().credit(player, amount).await?;
            println!("balance: {:.2} coins", balance);
        }
        "refresh" => {
            let mut scheduler = PriceRefreshScheduler::new(
                ctl.registry.clone(),
                ctl.prices.clone(),
                PriceSimulator::from_seed(ctl.cfg.sim_seed),
                ctl.cfg.refresh_interval(),
            );
            let report = scheduler.run_tick(now);
            for (ticker, n) in &report.refreshed {
                println!("{ticker}: +{n}");
            }
            for (ticker, reason) in &report.failed {
                println!("{ticker}: failed ({reason})");
            }
        }
        other => bail!("unknown command: {other}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
        return;
    }

    if let Err(err) = run(&args).await {
        // rejected commands are the player's to fix; anything else is ours
        match err.downcast_ref::<MarketError>() {
            Some(market) if market.is_validation() => {
                eprintln!("rejected: {market}");
                std::process::exit(1);
            }
            _ => {
                eprintln!("error: {err:#}");
                std::process::exit(2);
            }
        }
    }
}
