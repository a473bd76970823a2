use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult, ValidationError};

pub type PlayerId = u64;

/// A synthetic tradable stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub ticker: String,
    pub company: String,
    pub reference_ticker: String,
}

/// One hourly observation of a ticker's price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    pub fn new(ticker: impl Into<String>, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            ticker: ticker.into(),
            timestamp,
            price,
        }
    }

    /// Rebuilds a point from its stored columns, rejecting anything that
    /// could not have been written by this crate.
    pub fn from_row(ticker: String, ts: i64, price: f64) -> MarketResult<Self> {
        let timestamp = DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| MarketError::Corrupt(format!("{ticker}: timestamp {ts} out of range")))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(MarketError::Corrupt(format!(
                "{ticker}@{ts}: price {price} is not a positive number"
            )));
        }
        Ok(Self {
            ticker,
            timestamp,
            price,
        })
    }
}

/// A player's position in one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub shares: i64,
    pub average_price: f64,
}

impl Holding {
    pub fn from_row(ticker: String, shares: i64, average_price: f64) -> MarketResult<Self> {
        if shares <= 0 {
            return Err(MarketError::Corrupt(format!(
                "holding {ticker}: {shares} shares"
            )));
        }
        if !average_price.is_finite() || average_price <= 0.0 {
            return Err(MarketError::Corrupt(format!(
                "holding {ticker}: average price {average_price}"
            )));
        }
        Ok(Self {
            ticker,
            shares,
            average_price,
        })
    }

    /// Cost basis after adding `quantity` shares bought at `price`, or
    /// `None` if the share count would overflow.
    pub fn averaged_with(&self, quantity: i64, price: f64) -> Option<f64> {
        let shares = self.shares.checked_add(quantity)?;
        let old = self.shares as f64 * self.average_price;
        let new = quantity as f64 * price;
        Some((old + new) / shares as f64)
    }

    /// The holding after buying `quantity` more shares at `price`.
    pub fn bought(&self, quantity: i64, price: f64) -> Result<Holding, ValidationError> {
        let too_large = || ValidationError::PositionTooLarge {
            ticker: self.ticker.clone(),
            held: self.shares,
            requested: quantity,
        };
        let shares = self.shares.checked_add(quantity).ok_or_else(too_large)?;
        let average_price = self.averaged_with(quantity, price).ok_or_else(too_large)?;
        Ok(Holding {
            ticker: self.ticker.clone(),
            shares,
            average_price,
        })
    }

    pub fn cost_basis(&self) -> f64 {
        self.shares as f64 * self.average_price
    }
}

/// The slice of a player record the market cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub balance: f64,
    pub holdings: Vec<Holding>,
}

impl Player {
    pub fn holding(&self, ticker: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.ticker == ticker)
    }
}

pub fn validate_balance(id: PlayerId, balance: f64) -> MarketResult<f64> {
    if !balance.is_finite() || balance < 0.0 {
        return Err(MarketError::Corrupt(format!(
            "player {id}: balance {balance}"
        )));
    }
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_average() {
        let h = Holding {
            ticker: "ACME".into(),
            shares: 5,
            average_price: 10.0,
        };
        assert_eq!(h.averaged_with(5, 20.0), Some(15.0));
        assert_eq!(h.averaged_with(15, 10.0), Some(10.0));
    }

    #[test]
    fn share_overflow_is_rejected() {
        let h = Holding {
            ticker: "ACME".into(),
            shares: i64::MAX,
            average_price: 0.01,
        };
        assert_eq!(h.averaged_with(1, 0.01), None);
        assert!(matches!(
            h.bought(1, 0.01),
            Err(ValidationError::PositionTooLarge { held: i64::MAX, requested: 1, .. })
        ));
        let grown = Holding { shares: 2, ..h }.bought(3, 0.06).unwrap();
        assert_eq!(grown.shares, 5);
        assert!((grown.average_price - 0.04).abs() < 1e-12);
    }

    #[test]
    fn rows_are_validated() {
        assert!(PricePoint::from_row("ACME".into(), 1_700_000_000, 0.0).is_err());
        assert!(PricePoint::from_row("ACME".into(), 1_700_000_000, f64::NAN).is_err());
        assert!(PricePoint::from_row("ACME".into(), 1_700_000_000, 12.5).is_ok());
        assert!(Holding::from_row("ACME".into(), 0, 10.0).is_err());
        assert!(Holding::from_row("ACME".into(), 3, -1.0).is_err());
        assert!(validate_balance(1, -0.5).is_err());
        assert!(validate_balance(1, 0.0).is_ok());
    }
}
