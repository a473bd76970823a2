use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::Database;
use crate::error::{MarketError, MarketResult};
use crate::model::PricePoint;

/// Append-only hourly price series, one per ticker.
///
/// Duplicate `(ticker, timestamp)` pairs are ignored on append: the first
/// price written for an hour is the one that stays.
#[derive(Clone)]
pub struct PriceStore {
    db: Arc<Database>,
}

impl PriceStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persists `points` under `ticker` in one transaction and returns how
    /// many were new.
    pub fn append(&self, ticker: &str, points: &[PricePoint]) -> MarketResult<usize> {
        if let Some(bad) = points.iter().find(|p| !p.price.is_finite() || p.price <= 0.0) {
            return Err(MarketError::Corrupt(format!(
                "refusing to store {ticker}@{} with price {}",
                bad.timestamp, bad.price
            )));
        }

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO stock_prices (ticker, ts, price) VALUES (?1, ?2, ?3)")?;
            for p in points {
                inserted += stmt.execute(params![ticker, p.timestamp.timestamp(), p.price])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn latest(&self, ticker: &str) -> MarketResult<Option<PricePoint>> {
        let row = self
            .db
            .conn()
            .query_row(
                "SELECT ts, price FROM stock_prices WHERE ticker = ?1 ORDER BY ts DESC LIMIT 1",
                params![ticker],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?)),
            )
            .optional()?;
        row.map(|(ts, price)| PricePoint::from_row(ticker.to_string(), ts, price))
            .transpose()
    }

    /// First point inside the UTC calendar day `day`.
    pub fn at_date(&self, ticker: &str, day: NaiveDate) -> MarketResult<Option<PricePoint>> {
        let Some(start) = day.and_hms_opt(0, 0, 0).map(|d| d.and_utc()) else {
            return Ok(None);
        };
        let end = start + Duration::days(1) - Duration::seconds(1);
        Ok(self.range(ticker, start, end)?.into_iter().next())
    }

    /// All points with `start <= timestamp <= end`, ascending.
    pub fn range(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MarketResult<Vec<PricePoint>> {
        self.query(
            "SELECT ts, price FROM stock_prices
             WHERE ticker = ?1 AND ts >= ?2 AND ts <= ?3 ORDER BY ts ASC",
            ticker,
            start.timestamp(),
            end.timestamp(),
        )
    }

    pub fn full_history(&self, ticker: &str) -> MarketResult<Vec<PricePoint>> {
        self.query(
            "SELECT ts, price FROM stock_prices
             WHERE ticker = ?1 AND ts >= ?2 AND ts <= ?3 ORDER BY ts ASC",
            ticker,
            i64::MIN,
            i64::MAX,
        )
    }

    pub fn count(&self, ticker: &str) -> MarketResult<usize> {
        let n: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM stock_prices WHERE ticker = ?1",
            params![ticker],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn has_history(&self, ticker: &str) -> MarketResult<bool> {
        Ok(self.count(ticker)? > 0)
    }

    fn query(&self, sql: &str, ticker: &str, from: i64, to: i64) -> MarketResult<Vec<PricePoint>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![ticker, from, to], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (ts, price) = row?;
            out.push(PricePoint::from_row(ticker.to_string(), ts, price)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> PriceStore {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        PriceStore::new(Arc::new(db))
    }

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn points(ticker: &str, hours: &[(i64, f64)]) -> Vec<PricePoint> {
        hours.iter().map(|&(h, p)| PricePoint::new(ticker, at(h), p)).collect()
    }

    #[test]
    fn unknown_ticker_is_empty() {
        let s = store();
        assert!(s.latest("NOPE").unwrap().is_none());
        assert!(s.full_history("NOPE").unwrap().is_empty());
        assert!(s.range("NOPE", at(0), at(10)).unwrap().is_empty());
        assert!(s.at_date("NOPE", at(0).date_naive()).unwrap().is_none());
        assert!(!s.has_history("NOPE").unwrap());
    }

    #[test]
    fn latest_and_history_are_ordered() {
        let s = store();
        s.append("ACME", &points("ACME", &[(5, 12.0), (1, 10.0), (3, 11.0)])).unwrap();
        assert_eq!(s.latest("ACME").unwrap().unwrap().price, 12.0);
        let hist: Vec<f64> = s.full_history("ACME").unwrap().iter().map(|p| p.price).collect();
        assert_eq!(hist, vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn duplicate_timestamps_keep_first_write() {
        let s = store();
        assert_eq!(s.append("ACME", &points("ACME", &[(1, 10.0), (2, 11.0)])).unwrap(), 2);
        assert_eq!(s.append("ACME", &points("ACME", &[(2, 99.0), (3, 12.0)])).unwrap(), 1);
        let hist: Vec<f64> = s.full_history("ACME").unwrap().iter().map(|p| p.price).collect();
        assert_eq!(hist, vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn range_is_inclusive() {
        let s = store();
        s.append("ACME", &points("ACME", &[(0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0)])).unwrap();
        let r: Vec<f64> = s.range("ACME", at(1), at(2)).unwrap().iter().map(|p| p.price).collect();
        assert_eq!(r, vec![2.0, 3.0]);
    }

    #[test]
    fn at_date_returns_first_point_of_day() {
        let s = store();
        s.append("ACME", &points("ACME", &[(-1, 9.0), (2, 10.0), (23, 11.0), (24, 12.0)])).unwrap();
        let day = at(0).date_naive();
        assert_eq!(s.at_date("ACME", day).unwrap().unwrap().price, 10.0);
        let next = at(24).date_naive();
        assert_eq!(s.at_date("ACME", next).unwrap().unwrap().price, 12.0);
    }

    #[test]
    fn rejects_non_positive_prices() {
        let s = store();
        assert!(s.append("ACME", &points("ACME", &[(1, 10.0), (2, 0.0)])).is_err());
        assert_eq!(s.count("ACME").unwrap(), 0);
    }

    #[test]
    fn simulated_extension_round_trips_through_range() {
        let s = store();
        let mut sim = crate::simulator::PriceSimulator::seeded(9);
        let seed = points("ACME", &[(0, 100.0), (1, 101.5), (2, 99.8)]);
        s.append("ACME", &seed).unwrap();

        let ext = sim.extend_series(&seed, at(2) + Duration::hours(48)).unwrap();
        assert_eq!(s.append("ACME", &ext).unwrap(), 48);

        let start = ext[10].timestamp;
        let end = ext[30].timestamp;
        let got = s.range("ACME", start, end).unwrap();
        assert_eq!(got.len(), 21);
        assert_eq!(got.first().unwrap().timestamp, start);
        assert_eq!(got.last().unwrap().timestamp, end);
        for (stored, simulated) in got.iter().zip(&ext[10..=30]) {
            assert_eq!(stored.timestamp, simulated.timestamp);
            assert_eq!(stored.price, simulated.price);
        }
    }

    #[test]
    fn series_are_per_ticker() {
        let s = store();
        s.append("AAA", &points("AAA", &[(1, 10.0)])).unwrap();
        s.append("BBB", &points("BBB", &[(1, 20.0), (2, 21.0)])).unwrap();
        assert_eq!(s.count("AAA").unwrap(), 1);
        assert_eq!(s.latest("BBB").unwrap().unwrap().price, 21.0);
    }
}
