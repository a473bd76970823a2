use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MarketError, MarketResult};
use crate::provider::retry::{FetchPolicy, RetryConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub stocks_file: String,
    pub refresh_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
    pub retry_base_ms: u64,
    pub yahoo_base: String,
    pub starting_balance: f64,
    /// Fixed RNG seed for reproducible price paths.
    pub sim_seed: Option<u64>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./coinmarket.sqlite".to_string()),
            stocks_file: std::env::var("STOCKS_FILE").unwrap_or_else(|_| "data/stocks.json".to_string()),
            refresh_secs: env_or("REFRESH_SECS", 3600),
            fetch_timeout_secs: env_or("FETCH_TIMEOUT_SECS", 15),
            fetch_retries: env_or("FETCH_RETRIES", 3),
            retry_base_ms: env_or("RETRY_BASE_MS", 500),
            yahoo_base: std::env::var("YAHOO_BASE").unwrap_or_else(|_| "https://query1.finance.yahoo.com".to_string()),
            starting_balance: env_or("STARTING_BALANCE", 10.0),
            sim_seed: std::env::var("SIM_SEED").ok().and_then(|v| v.parse().ok()),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.fetch_retries,
            base_delay_ms: self.retry_base_ms,
            ..RetryConfig::default()
        }
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            retry: self.retry(),
            timeout: self.fetch_timeout(),
        }
    }
}

/// Longest seed window a stock may ask the provider for.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

/// One configured stock, as listed in the stocks file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StockSpec {
    pub ticker: String,
    pub company: String,
    pub reference_ticker: String,
    pub lookback_days: u32,
}

/// Parses and validates the stocks file contents.
pub fn parse_stock_specs(raw: &str) -> MarketResult<Vec<StockSpec>> {
    let specs: Vec<StockSpec> = serde_json::from_str(raw)
        .map_err(|e| MarketError::Config(format!("stocks file: {e}")))?;

    let mut seen = HashSet::new();
    specs
        .into_iter()
        .map(|mut spec| {
            spec.ticker = spec.ticker.trim().to_uppercase();
            spec.reference_ticker = spec.reference_ticker.trim().to_string();
            spec.company = spec.company.trim().to_string();
            if spec.ticker.is_empty() || spec.reference_ticker.is_empty() || spec.company.is_empty() {
                return Err(MarketError::Config(format!("incomplete stock entry: {spec:?}")));
            }
            if !(2..=MAX_LOOKBACK_DAYS).contains(&spec.lookback_days) {
                return Err(MarketError::Config(format!(
                    "{}: lookback_days must be between 2 and {MAX_LOOKBACK_DAYS}",
                    spec.ticker
                )));
            }
            if !seen.insert(spec.ticker.clone()) {
                return Err(MarketError::Config(format!("duplicate ticker {}", spec.ticker)));
            }
            Ok(spec)
        })
        .collect()
}

pub fn load_stock_specs(path: impl AsRef<Path>) -> MarketResult<Vec<StockSpec>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| MarketError::Config(format!("{}: {e}", path.display())))?;
    parse_stock_specs(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalises() {
        let specs = parse_stock_specs(
            r#"[{"ticker": " acme ", "company": "Acme Corp", "reference_ticker": "AAPL", "lookback_days": 90}]"#,
        )
        .unwrap();
        assert_eq!(specs[0].ticker, "ACME");
        assert_eq!(specs[0].lookback_days, 90);
    }

    #[test]
    fn rejects_unknown_fields_and_duplicates() {
        assert!(parse_stock_specs(
            r#"[{"ticker": "A", "company": "A", "reference_ticker": "A", "lookback_days": 5, "real_ticker": "X"}]"#
        )
        .is_err());
        assert!(parse_stock_specs(
            r#"[{"ticker": "A", "company": "A", "reference_ticker": "A", "lookback_days": 5},
                {"ticker": "a", "company": "B", "reference_ticker": "B", "lookback_days": 5}]"#
        )
        .is_err());
    }

    #[test]
    fn rejects_missing_fields_and_out_of_range_lookback() {
        assert!(parse_stock_specs(r#"[{"ticker": "A", "company": "A", "reference_ticker": "A"}]"#).is_err());
        assert!(parse_stock_specs(
            r#"[{"ticker": "A", "company": "A", "reference_ticker": "A", "lookback_days": 1}]"#
        )
        .is_err());
        let err = parse_stock_specs(
            r#"[{"ticker": "A", "company": "A", "reference_ticker": "A", "lookback_days": 4000000000}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, MarketError::Config(_)));
        assert!(parse_stock_specs(
            r#"[{"ticker": "A", "company": "A", "reference_ticker": "A", "lookback_days": 3650}]"#
        )
        .is_ok());
    }
}
