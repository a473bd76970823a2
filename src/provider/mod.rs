use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;

pub mod retry;
pub mod yahoo;

pub use yahoo::YahooSource;

/// One real-world daily closing price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyClose {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// Source of real historical closes, consulted only while bootstrapping.
#[async_trait]
pub trait HistoricalPriceSource: Send + Sync {
    async fn daily_closes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyClose>, ProviderError>;
}

/// Fixed in-memory closes keyed by symbol. Unknown symbols yield
/// [`ProviderError::Empty`].
#[derive(Debug, Default, Clone)]
pub struct StaticPriceSource {
    closes: HashMap<String, Vec<DailyClose>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_closes(mut self, symbol: &str, closes: Vec<DailyClose>) -> Self {
        self.closes.insert(symbol.to_string(), closes);
        self
    }
}

#[async_trait]
impl HistoricalPriceSource for StaticPriceSource {
    async fn daily_closes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyClose>, ProviderError> {
        let closes: Vec<DailyClose> = self
            .closes
            .get(symbol)
            .map(|all| {
                all.iter()
                    .filter(|c| c.timestamp >= start && c.timestamp <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        if closes.is_empty() {
            return Err(ProviderError::Empty(symbol.to_string()));
        }
        Ok(closes)
    }
}
