//! End to end: bootstrap, hourly refresh, then trading at the refreshed price.

use std::sync::Arc;

use chrono::{Duration, DurationRound, Utc};
use tokio::sync::watch;

use coinmarket::config::StockSpec;
use coinmarket::db::Database;
use coinmarket::ledger::Ledger;
use coinmarket::market::{HistoryWindow, MarketView};
use coinmarket::prices::PriceStore;
use coinmarket::provider::retry::FetchPolicy;
use coinmarket::provider::{DailyClose, StaticPriceSource};
use coinmarket::registry::StockRegistry;
use coinmarket::scheduler::PriceRefreshScheduler;
use coinmarket::simulator::{PriceSimulator, PRICE_FLOOR};
use coinmarket::trading::TradingEngine;

#[tokio::test]
async fn bootstrap_refresh_and_trade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.sqlite");
    let db = Arc::new(Database::open(path.to_str().unwrap()).unwrap());
    db.init().unwrap();

    let registry = StockRegistry::new(db.clone());
    let prices = PriceStore::new(db.clone());
    let now = Utc::now();

    // last real close two days back, so the first tick has ~48 hours to fill
    let closes: Vec<DailyClose> = (0..30)
        .map(|d| DailyClose {
            timestamp: now - Duration::days(31 - d),
            close: 100.0 * (1.0 + 0.01 * ((d % 5) as f64 - 2.0)),
        })
        .collect();
    let source = StaticPriceSource::new().with_closes("AAPL", closes);
    let spec = StockSpec {
        ticker: "BNNA".into(),
        company: "Banana".into(),
        reference_ticker: "AAPL".into(),
        lookback_days: 60,
    };

    let (ready_tx, ready_rx) = watch::channel(false);
    let handle = PriceRefreshScheduler::new(
        registry.clone(),
        prices.clone(),
        PriceSimulator::seeded(42),
        std::time::Duration::from_secs(3600),
    )
    .start(ready_rx);

    registry
        .bootstrap(
            &[spec],
            &prices,
            &PriceSimulator::seeded(7),
            &source,
            &FetchPolicy::default(),
            now,
        )
        .await
        .unwrap();
    let seeded = prices.full_history("BNNA").unwrap();
    assert_eq!(seeded.len(), 30);
    let last_seed = seeded.last().unwrap().timestamp;

    ready_tx.send(true).unwrap();
    let mut waited = 0;
    while prices.count("BNNA").unwrap() == 30 {
        assert!(waited < 100, "first tick never ran");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        waited += 1;
    }
    handle.stop().await;

    let history = prices.full_history("BNNA").unwrap();
    let added = &history[30..];
    let expected = ((Utc::now().duration_trunc(Duration::hours(1)).unwrap() - last_seed).num_hours()) as usize;
    assert!(added.len() == expected || added.len() + 1 == expected);
    for (i, p) in added.iter().enumerate() {
        assert_eq!(p.timestamp, last_seed + Duration::hours(i as i64 + 1));
        assert!(p.price >= PRICE_FLOOR && p.price.is_finite());
    }

    let market = MarketView::new(registry.clone(), prices.clone());
    let (_, quote) = market.quote("BNNA").unwrap();
    assert_eq!(quote.timestamp, history.last().unwrap().timestamp);
    let day = market.history("BNNA", HistoryWindow::Day, Utc::now()).unwrap();
    assert!(day.len() >= 23 && day.len() <= 25);

    let ledger = Arc::new(Ledger::new(db, 1_000_000.0));
    let engine = TradingEngine::new(registry, prices, ledger);
    let receipt = engine.buy(5, "BNNA", 3).await.unwrap();
    assert_eq!(receipt.price, quote.price);
    assert_eq!(receipt.total, quote.price * 3.0);
}
