//! Return-based random walk used to grow every stock's price history.
//!
//! The walk is calibrated on the series it extends: log returns of the input
//! give `mu` and `sigma`, each new hour draws `r ~ Normal(mu, sigma)` and
//! moves the price by `(1 + r)`. After bootstrap the input is the simulator's
//! own earlier output, so volatility follows the synthetic series rather than
//! the real reference ticker.

use chrono::{DateTime, Duration, DurationRound, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::config::StockSpec;
use crate::error::{MarketError, MarketResult};
use crate::model::PricePoint;
use crate::provider::retry::FetchPolicy;
use crate::provider::{DailyClose, HistoricalPriceSource};

/// Lowest price a simulated step may produce.
pub const PRICE_FLOOR: f64 = 0.01;

/// Drift and volatility of a series' hourly log returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub mu: f64,
    pub sigma: f64,
}

impl Calibration {
    /// Estimates `mu`/`sigma` over the whole series. Non-positive prices
    /// count as 1 and the first (undefined) return counts as 0.
    pub fn from_prices(prices: &[f64]) -> Self {
        let returns = log_returns(prices);
        let (mu, sigma) = mean_std(&returns);
        Self { mu, sigma }
    }
}

fn clamp_price(p: f64) -> f64 {
    if p > 0.0 {
        p
    } else {
        1.0
    }
}

fn log_returns(prices: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(prices.len());
    let mut prev: Option<f64> = None;
    for &p in prices {
        let p = clamp_price(p);
        out.push(match prev {
            Some(q) => (p / q).ln(),
            None => 0.0,
        });
        prev = Some(p);
    }
    out
}

/// Mean and sample (n - 1) standard deviation; sigma is 0 below two samples.
fn mean_std(xs: &[f64]) -> (f64, f64) {
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    if xs.len() < 2 {
        return (mean, 0.0);
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

fn next_price(prev: f64, sample: f64) -> f64 {
    let next = prev * (1.0 + sample);
    if next.is_finite() && next >= PRICE_FLOOR {
        next
    } else {
        PRICE_FLOOR
    }
}

/// Maps real closes onto a synthetic ticker: hour-aligned, positive,
/// ascending and one point per timestamp.
pub fn seed_series(ticker: &str, closes: &[DailyClose]) -> Vec<PricePoint> {
    let mut points: Vec<PricePoint> = closes
        .iter()
        .filter(|c| c.close.is_finite() && c.close > 0.0)
        .map(|c| {
            let ts = c
                .timestamp
                .duration_trunc(Duration::hours(1))
                .unwrap_or(c.timestamp);
            PricePoint::new(ticker, ts, c.close)
        })
        .collect();
    // stable sort keeps the provider's first close for a repeated hour
    points.sort_by_key(|p| p.timestamp);
    points.dedup_by_key(|p| p.timestamp);
    points
}

pub struct PriceSimulator {
    rng: StdRng,
}

impl Default for PriceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceSimulator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map(Self::seeded).unwrap_or_default()
    }

    /// Fetches `lookback_days` of real closes for the stock's reference
    /// ticker and returns them as the stock's seed history.
    pub async fn simulate_initial_series(
        &self,
        source: &dyn HistoricalPriceSource,
        policy: &FetchPolicy,
        stock: &StockSpec,
        now: DateTime<Utc>,
    ) -> MarketResult<Vec<PricePoint>> {
        let start = now
            .checked_sub_signed(Duration::days(i64::from(stock.lookback_days)))
            .ok_or_else(|| {
                MarketError::Config(format!(
                    "{}: lookback of {} days is out of range",
                    stock.ticker, stock.lookback_days
                ))
            })?;
        let closes = policy
            .run("daily_closes", || {
                source.daily_closes(&stock.reference_ticker, start, now)
            })
            .await?;

        let series = seed_series(&stock.ticker, &closes);
        if series.is_empty() {
            return Err(MarketError::DataUnavailable(stock.ticker.clone()));
        }
        Ok(series)
    }

    /// Simulates one point per whole hour between the series' last timestamp
    /// (exclusive) and `now` (inclusive). Returns only the new points; an
    /// empty result means less than an hour has passed.
    pub fn extend_series(
        &mut self,
        existing: &[PricePoint],
        now: DateTime<Utc>,
    ) -> MarketResult<Vec<PricePoint>> {
        let last = existing
            .last()
            .ok_or_else(|| MarketError::DataUnavailable("empty series".to_string()))?;

        let hours = (now - last.timestamp).num_hours();
        if hours < 1 {
            return Ok(Vec::new());
        }

        let prices: Vec<f64> = existing.iter().map(|p| p.price).collect();
        let cal = Calibration::from_prices(&prices);
        let normal = Normal::new(cal.mu, cal.sigma).map_err(|e| {
            MarketError::Corrupt(format!(
                "{}: cannot calibrate (mu={}, sigma={}): {e}",
                last.ticker, cal.mu, cal.sigma
            ))
        })?;

        let mut price = clamp_price(last.price);
        let path = (1..=hours)
            .map(|k| {
                price = next_price(price, normal.sample(&mut self.rng));
                PricePoint::new(last.ticker.clone(), last.timestamp + Duration::hours(k), price)
            })
            .collect();
        Ok(path)
    }
}
