use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::MarketResult;
use crate::logging::{error, info, log_series_extended, obj, v_str, warn, Domain};
use crate::prices::PriceStore;
use crate::registry::StockRegistry;
use crate::simulator::PriceSimulator;

/// Per-ticker outcome of one refresh tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tickers refreshed, with the number of points appended (0 when less
    /// than an hour had passed).
    pub refreshed: Vec<(String, usize)>,
    /// Tickers whose refresh failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl TickReport {
    pub fn appended(&self) -> usize {
        self.refreshed.iter().map(|(_, n)| n).sum()
    }
}

/// Hourly job that extends every registered stock's price series.
pub struct PriceRefreshScheduler {
    registry: StockRegistry,
    prices: PriceStore,
    simulator: PriceSimulator,
    every: Duration,
}

impl PriceRefreshScheduler {
    pub fn new(
        registry: StockRegistry,
        prices: PriceStore,
        simulator: PriceSimulator,
        every: Duration,
    ) -> Self {
        Self {
            registry,
            prices,
            simulator,
            every,
        }
    }

    /// Runs one refresh over all registered tickers. A failing ticker is
    /// logged and reported; the remaining tickers are still refreshed.
    pub fn run_tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let stocks = match self.registry.all() {
            Ok(stocks) => stocks,
            Err(err) => {
                error(
                    Domain::Scheduler,
                    "list_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
                report.failed.push(("*".to_string(), err.to_string()));
                return report;
            }
        };

        for stock in stocks {
            match self.refresh_one(&stock.ticker, now) {
                Ok(n) => report.refreshed.push((stock.ticker, n)),
                Err(err) => {
                    warn(
                        Domain::Scheduler,
                        "ticker_failed",
                        obj(&[("ticker", v_str(&stock.ticker)), ("error", v_str(&err.to_string()))]),
                    );
                    report.failed.push((stock.ticker, err.to_string()));
                }
            }
        }

        info(
            Domain::Scheduler,
            "tick",
            obj(&[
                ("refreshed", json!(report.refreshed.len())),
                ("appended", json!(report.appended())),
                ("failed", json!(report.failed.len())),
            ]),
        );
        report
    }

    fn refresh_one(&mut self, ticker: &str, now: DateTime<Utc>) -> MarketResult<usize> {
        let series = self.prices.full_history(ticker)?;
        let next = self.simulator.extend_series(&series, now)?;
        if next.is_empty() {
            return Ok(0);
        }
        let appended = self.prices.append(ticker, &next)?;
        log_series_extended(ticker, appended, next.last().map(|p| p.price));
        Ok(appended)
    }

    /// Spawns the job. Nothing runs until `ready` reads `true`; after that the
    /// first tick fires immediately and then every interval, measured from
    /// tick start to tick start.
    pub fn start(self, ready: watch::Receiver<bool>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(ready, shutdown_rx));
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self, mut ready: watch::Receiver<bool>, mut shutdown: watch::Receiver<bool>) {
        while !*ready.borrow_and_update() {
            tokio::select! {
                changed = ready.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }

        info(
            Domain::Scheduler,
            "started",
            obj(&[("interval_secs", Value::from(self.every.as_secs()))]),
        );

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            self.run_tick(Utc::now());
        }

        info(Domain::Scheduler, "stopped", obj(&[]));
    }
}

/// Owner's side of a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for the current tick, if any, to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error(
                Domain::Scheduler,
                "join_failed",
                obj(&[("error", v_str(&err.to_string()))]),
            );
        }
    }
}
