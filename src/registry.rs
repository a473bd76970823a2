use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::json;

use crate::config::StockSpec;
use crate::db::Database;
use crate::error::MarketResult;
use crate::logging::{info, obj, v_str, warn, Domain};
use crate::model::Stock;
use crate::prices::PriceStore;
use crate::provider::retry::FetchPolicy;
use crate::provider::HistoricalPriceSource;
use crate::simulator::PriceSimulator;

/// Outcome of one bootstrap pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Stocks whose metadata was written during this pass.
    pub registered: Vec<String>,
    /// Stocks that received an initial price history.
    pub seeded: Vec<String>,
    /// Stocks that already had prices and were left alone.
    pub untouched: Vec<String>,
    /// Stocks whose history could not be fetched, with the reason.
    pub skipped: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct StockRegistry {
    db: Arc<Database>,
}

impl StockRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Registers `stock` unless the ticker is already known. Returns whether
    /// anything was written.
    pub fn register(&self, stock: &Stock) -> MarketResult<bool> {
        let n = self.db.conn().execute(
            "INSERT OR IGNORE INTO stocks (ticker, company, reference_ticker) VALUES (?1, ?2, ?3)",
            params![stock.ticker, stock.company, stock.reference_ticker],
        )?;
        Ok(n > 0)
    }

    pub fn get(&self, ticker: &str) -> MarketResult<Option<Stock>> {
        let stock = self
            .db
            .conn()
            .query_row(
                "SELECT ticker, company, reference_ticker FROM stocks WHERE ticker = ?1",
                params![ticker],
                |r| {
                    Ok(Stock {
                        ticker: r.get(0)?,
                        company: r.get(1)?,
                        reference_ticker: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(stock)
    }

    pub fn contains(&self, ticker: &str) -> MarketResult<bool> {
        Ok(self.get(ticker)?.is_some())
    }

    pub fn all(&self) -> MarketResult<Vec<Stock>> {
        let conn = self.db.conn();
        let mut stmt =
            conn.prepare_cached("SELECT ticker, company, reference_ticker FROM stocks ORDER BY ticker")?;
        let rows = stmt.query_map([], |r| {
            Ok(Stock {
                ticker: r.get(0)?,
                company: r.get(1)?,
                reference_ticker: r.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Makes sure every configured stock has metadata and a price history.
    ///
    /// Stocks that already have prices are not touched, so this is safe to
    /// run on every start. A stock whose history cannot be fetched is
    /// skipped; the rest still bootstrap. Only storage failures abort.
    pub async fn bootstrap(
        &self,
        specs: &[StockSpec],
        prices: &PriceStore,
        simulator: &PriceSimulator,
        source: &dyn HistoricalPriceSource,
        policy: &FetchPolicy,
        now: DateTime<Utc>,
    ) -> MarketResult<BootstrapReport> {
        let mut report = BootstrapReport::default();

        for spec in specs {
            let stock = Stock {
                ticker: spec.ticker.clone(),
                company: spec.company.clone(),
                reference_ticker: spec.reference_ticker.clone(),
            };
            if self.register(&stock)? {
                info(
                    Domain::Bootstrap,
                    "stock_registered",
                    obj(&[("ticker", v_str(&stock.ticker)), ("company", v_str(&stock.company))]),
                );
                report.registered.push(stock.ticker.clone());
            }

            if prices.has_history(&spec.ticker)? {
                report.untouched.push(spec.ticker.clone());
                continue;
            }

            match simulator.simulate_initial_series(source, policy, spec, now).await {
                Ok(series) => {
                    let appended = prices.append(&spec.ticker, &series)?;
                    info(
                        Domain::Bootstrap,
                        "history_seeded",
                        obj(&[
                            ("ticker", v_str(&spec.ticker)),
                            ("reference_ticker", v_str(&spec.reference_ticker)),
                            ("points", json!(appended)),
                        ]),
                    );
                    report.seeded.push(spec.ticker.clone());
                }
                Err(err) => {
                    warn(
                        Domain::Bootstrap,
                        "history_skipped",
                        obj(&[
                            ("ticker", v_str(&spec.ticker)),
                            ("reference_ticker", v_str(&spec.reference_ticker)),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                    report.skipped.push((spec.ticker.clone(), err.to_string()));
                }
            }
        }

        Ok(report)
    }
}
