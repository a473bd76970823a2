use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use coinmarket::config::{load_stock_specs, Config};
use coinmarket::db::Database;
use coinmarket::logging::{error, info, obj, v_str, Domain};
use coinmarket::prices::PriceStore;
use coinmarket::provider::YahooSource;
use coinmarket::registry::StockRegistry;
use coinmarket::scheduler::PriceRefreshScheduler;
use coinmarket::simulator::PriceSimulator;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    info(
        Domain::System,
        "starting",
        obj(&[
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("stocks_file", v_str(&cfg.stocks_file)),
            ("refresh_secs", json!(cfg.refresh_secs)),
        ]),
    );

    let db = Arc::new(Database::open(&cfg.sqlite_path).context("open database")?);
    db.init().context("init schema")?;
    let specs = load_stock_specs(&cfg.stocks_file)?;

    let registry = StockRegistry::new(db.clone());
    let prices = PriceStore::new(db.clone());
    // only consulted for the seed fetch, which draws nothing
    let bootstrapper = PriceSimulator::new();
    let source = YahooSource::new(cfg.yahoo_base.clone());

    let (ready_tx, ready_rx) = watch::channel(false);
    let scheduler = PriceRefreshScheduler::new(
        registry.clone(),
        prices.clone(),
        PriceSimulator::from_seed(cfg.sim_seed),
        cfg.refresh_interval(),
    )
    .start(ready_rx);

    let report = registry
        .bootstrap(&specs, &prices, &bootstrapper, &source, &cfg.fetch_policy(), Utc::now())
        .await?;
    info(
        Domain::Bootstrap,
        "complete",
        obj(&[
            ("registered", json!(report.registered)),
            ("seeded", json!(report.seeded)),
            ("untouched", json!(report.untouched.len())),
            ("skipped", json!(report.skipped.len())),
        ]),
    );

    let _ = ready_tx.send(true);

    if let Err(err) = tokio::signal::ctrl_c().await {
        error(
            Domain::System,
            "signal_failed",
            obj(&[("error", v_str(&err.to_string()))]),
        );
    }
    info(Domain::System, "shutdown", obj(&[]));
    scheduler.stop().await;
    Ok(())
}
