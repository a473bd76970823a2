use std::time::Duration;

use thiserror::Error;

/// Domain precondition failures. These are shown to the player as-is and
/// never leave partial state behind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("quantity must be at least 1 (got {0})")]
    InvalidQuantity(i64),

    #[error("amount must be a positive number of coins (got {0})")]
    InvalidAmount(f64),

    #[error("unknown ticker {0}")]
    UnknownTicker(String),

    #[error("current price of {ticker} is not positive ({price})")]
    NonPositivePrice { ticker: String, price: f64 },

    #[error("not enough coins: need {needed:.2}, have {available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("you do not hold any {0}")]
    NoHolding(String),

    #[error("position in {ticker} cannot grow past {held} shares by {requested}")]
    PositionTooLarge {
        ticker: String,
        held: i64,
        requested: i64,
    },

    #[error("not enough shares of {ticker}: hold {held}, tried to sell {requested}")]
    InsufficientShares {
        ticker: String,
        held: i64,
        requested: i64,
    },
}

/// Failures talking to the historical market data provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed provider payload: {0}")]
    Parse(String),

    #[error("provider has no usable closes for {0}")]
    Empty(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Timeout(_) => true,
            ProviderError::Status(code) => is_retryable_http_status(*code),
            ProviderError::Parse(_) | ProviderError::Empty(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

pub fn is_retryable_http_status(status: u16) -> bool {
    matches!(
        status,
        408 |   // Request Timeout
        429 |   // Too Many Requests
        500 |   // Internal Server Error
        502 |   // Bad Gateway
        503 |   // Service Unavailable
        504 // Gateway Timeout
    )
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no price history for {0}")]
    DataUnavailable(String),

    #[error("historical data provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("configuration: {0}")]
    Config(String),
}

impl MarketError {
    pub fn is_validation(&self) -> bool {
        matches!(self, MarketError::Validation(_))
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
