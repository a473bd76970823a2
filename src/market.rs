//! Read-only views backing the `list`, `price` and `history` commands.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{MarketError, MarketResult, ValidationError};
use crate::model::{PricePoint, Stock};
use crate::prices::PriceStore;
use crate::registry::StockRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    Day,
    Week,
    Month,
    All,
}

impl HistoryWindow {
    pub fn lookback(&self) -> Option<Duration> {
        match self {
            HistoryWindow::Day => Some(Duration::days(1)),
            HistoryWindow::Week => Some(Duration::days(7)),
            HistoryWindow::Month => Some(Duration::days(30)),
            HistoryWindow::All => None,
        }
    }
}

impl FromStr for HistoryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(HistoryWindow::Day),
            "week" => Ok(HistoryWindow::Week),
            "month" => Ok(HistoryWindow::Month),
            "all" => Ok(HistoryWindow::All),
            other => Err(format!("unknown window {other:?}; available: day week month all")),
        }
    }
}

/// One row of the stock board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockSummary {
    pub stock: Stock,
    pub price: Option<f64>,
    /// Percent change against the first price of yesterday's calendar day.
    pub change_24h: Option<f64>,
    /// Percent change against the first price of the day a week ago.
    pub change_7d: Option<f64>,
}

pub fn percent_change(current: f64, past: f64) -> Option<f64> {
    if past > 0.0 {
        Some((current - past) / past * 100.0)
    } else {
        None
    }
}

#[derive(Clone)]
pub struct MarketView {
    registry: StockRegistry,
    prices: PriceStore,
}

impl MarketView {
    pub fn new(registry: StockRegistry, prices: PriceStore) -> Self {
        Self { registry, prices }
    }

    pub fn board(&self, now: DateTime<Utc>) -> MarketResult<Vec<StockSummary>> {
        let day_ago = (now - Duration::days(1)).date_naive();
        let week_ago = (now - Duration::days(7)).date_naive();

        self.registry
            .all()?
            .into_iter()
            .map(|stock| -> MarketResult<StockSummary> {
                let price = self.prices.latest(&stock.ticker)?.map(|p| p.price);
                let change = |past: Option<PricePoint>| {
                    price.zip(past).and_then(|(cur, past)| percent_change(cur, past.price))
                };
                let change_24h = change(self.prices.at_date(&stock.ticker, day_ago)?);
                let change_7d = change(self.prices.at_date(&stock.ticker, week_ago)?);
                Ok(StockSummary {
                    stock,
                    price,
                    change_24h,
                    change_7d,
                })
            })
            .collect()
    }

    pub fn stock(&self, ticker: &str) -> MarketResult<Stock> {
        self.registry
            .get(ticker)?
            .ok_or_else(|| ValidationError::UnknownTicker(ticker.to_string()).into())
    }

    pub fn quote(&self, ticker: &str) -> MarketResult<(Stock, PricePoint)> {
        let stock = self.stock(ticker)?;
        let point = self
            .prices
            .latest(ticker)?
            .ok_or_else(|| MarketError::DataUnavailable(ticker.to_string()))?;
        Ok((stock, point))
    }

    /// Points for a chart over `window`; an empty window is an error since
    /// there is nothing to draw.
    pub fn history(
        &self,
        ticker: &str,
        window: HistoryWindow,
        now: DateTime<Utc>,
    ) -> MarketResult<Vec<PricePoint>> {
        self.stock(ticker)?;
        let points = match window.lookback() {
            Some(back) => self.prices.range(ticker, now - back, now)?,
            None => self.prices.full_history(ticker)?,
        };
        if points.is_empty() {
            return Err(MarketError::DataUnavailable(ticker.to_string()));
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn view() -> (MarketView, PriceStore, StockRegistry) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.init().unwrap();
        let registry = StockRegistry::new(db.clone());
        let prices = PriceStore::new(db);
        (MarketView::new(registry.clone(), prices.clone()), prices, registry)
    }

    fn acme() -> Stock {
        Stock {
            ticker: "ACME".into(),
            company: "Acme".into(),
            reference_ticker: "AAPL".into(),
        }
    }

    #[test]
    fn percent_change_guards_zero() {
        assert_eq!(percent_change(150.0, 100.0), Some(50.0));
        assert_eq!(percent_change(50.0, 100.0), Some(-50.0));
        assert_eq!(percent_change(5.0, 0.0), None);
    }

    #[test]
    fn board_computes_day_and_week_change() {
        let (view, prices, registry) = view();
        registry.register(&acme()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let at = |d: i64, h: u32| Utc.with_ymd_and_hms(2024, 6, 15, h, 0, 0).unwrap() - Duration::days(d);
        prices
            .append(
                "ACME",
                &[
                    PricePoint::new("ACME", at(7, 3), 50.0),
                    PricePoint::new("ACME", at(7, 9), 55.0),
                    PricePoint::new("ACME", at(1, 0), 80.0),
                    PricePoint::new("ACME", at(0, 11), 100.0),
                ],
            )
            .unwrap();

        let board = view.board(now).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].price, Some(100.0));
        assert_eq!(board[0].change_24h, Some(25.0));
        assert_eq!(board[0].change_7d, Some(100.0));
    }

    #[test]
    fn board_without_history_has_no_changes() {
        let (view, _, registry) = view();
        registry.register(&acme()).unwrap();
        let board = view.board(Utc::now()).unwrap();
        assert_eq!(board[0].price, None);
        assert_eq!(board[0].change_24h, None);
    }

    #[test]
    fn history_windows() {
        let (view, prices, registry) = view();
        registry.register(&acme()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let pts: Vec<PricePoint> = (0..24 * 10)
            .map(|h| PricePoint::new("ACME", now - Duration::hours(h), 10.0 + h as f64))
            .collect();
        prices.append("ACME", &pts).unwrap();

        assert_eq!(view.history("ACME", HistoryWindow::Day, now).unwrap().len(), 25);
        assert_eq!(view.history("ACME", HistoryWindow::Week, now).unwrap().len(), 24 * 7 + 1);
        assert_eq!(view.history("ACME", HistoryWindow::All, now).unwrap().len(), 240);
        assert!(matches!(
            view.history("NOPE", HistoryWindow::Day, now),
            Err(MarketError::Validation(ValidationError::UnknownTicker(_)))
        ));
        assert!(matches!(
            view.history("ACME", HistoryWindow::Day, now + Duration::days(30)),
            Err(MarketError::DataUnavailable(_))
        ));
        assert!("year".parse::<HistoryWindow>().is_err());
    }
}
