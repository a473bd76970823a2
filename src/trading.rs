use std::sync::Arc;

use serde::Serialize;

use crate::error::{MarketError, MarketResult, ValidationError};
use crate::ledger::Ledger;
use crate::logging::{log_trade, log_trade_rejected};
use crate::model::{Holding, PlayerId};
use crate::prices::PriceStore;
use crate::registry::StockRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReceipt {
    pub player: PlayerId,
    pub ticker: String,
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    pub total: f64,
    pub balance_after: f64,
    /// `None` once a sell closes the position.
    pub holding_after: Option<Holding>,
}

/// A holding marked to the latest stored price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub holding: Holding,
    pub price: Option<f64>,
    pub market_value: Option<f64>,
    pub unrealized: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub player: PlayerId,
    pub balance: f64,
    pub positions: Vec<Position>,
}

impl Portfolio {
    /// Balance plus the market value of every priced position.
    pub fn net_worth(&self) -> f64 {
        self.balance + self.positions.iter().filter_map(|p| p.market_value).sum::<f64>()
    }
}

/// Converts coins into shares and back at the latest stored price.
pub struct TradingEngine {
    registry: StockRegistry,
    prices: PriceStore,
    ledger: Arc<Ledger>,
}

impl TradingEngine {
    pub fn new(registry: StockRegistry, prices: PriceStore, ledger: Arc<Ledger>) -> Self {
        Self {
            registry,
            prices,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub async fn buy(&self, player: PlayerId, ticker: &str, quantity: i64) -> MarketResult<TradeReceipt> {
        let result = self.execute(Side::Buy, player, ticker, quantity).await;
        report(Side::Buy, player, ticker, quantity, result)
    }

    pub async fn sell(&self, player: PlayerId, ticker: &str, quantity: i64) -> MarketResult<TradeReceipt> {
        let result = self.execute(Side::Sell, player, ticker, quantity).await;
        report(Side::Sell, player, ticker, quantity, result)
    }

    async fn execute(
        &self,
        side: Side,
        player: PlayerId,
        ticker: &str,
        quantity: i64,
    ) -> MarketResult<TradeReceipt> {
        if quantity < 1 {
            return Err(ValidationError::InvalidQuantity(quantity).into());
        }
        if !self.registry.contains(ticker)? {
            return Err(ValidationError::UnknownTicker(ticker.to_string()).into());
        }

        let guard = self.ledger.lock(player).await;
        // read after acquiring the guard so the trade uses the freshest price
        let price = self.current_price(ticker)?;
        let (balance_after, holding_after) = match side {
            Side::Buy => {
                let (balance, holding) = self.ledger.apply_buy(&guard, ticker, quantity, price)?;
                (balance, Some(holding))
            }
            Side::Sell => self.ledger.apply_sell(&guard, ticker, quantity, price)?,
        };
        drop(guard);

        Ok(TradeReceipt {
            player,
            ticker: ticker.to_string(),
            side,
            quantity,
            price,
            total: price * quantity as f64,
            balance_after,
            holding_after,
        })
    }

    /// Latest stored price, which must exist and be positive.
    pub fn current_price(&self, ticker: &str) -> MarketResult<f64> {
        let point = self
            .prices
            .latest(ticker)?
            .ok_or_else(|| MarketError::DataUnavailable(ticker.to_string()))?;
        if !(point.price > 0.0) {
            return Err(ValidationError::NonPositivePrice {
                ticker: ticker.to_string(),
                price: point.price,
            }
            .into());
        }
        Ok(point.price)
    }

    pub fn portfolio(&self, player: PlayerId) -> MarketResult<Portfolio> {
        let record = self.ledger.player(player)?;
        let mut positions = Vec::with_capacity(record.holdings.len());
        for holding in record.holdings {
            let price = self.prices.latest(&holding.ticker)?.map(|p| p.price);
            let market_value = price.map(|p| p * holding.shares as f64);
            let unrealized = market_value.map(|v| v - holding.cost_basis());
            positions.push(Position {
                holding,
                price,
                market_value,
                unrealized,
            });
        }
        Ok(Portfolio {
            player,
            balance: record.balance,
            positions,
        })
    }
}

fn report(
    side: Side,
    player: PlayerId,
    ticker: &str,
    quantity: i64,
    result: MarketResult<TradeReceipt>,
) -> MarketResult<TradeReceipt> {
    match &result {
        Ok(r) => log_trade(player, ticker, side.as_str(), quantity, r.price, r.balance_after),
        Err(err) => log_trade_rejected(player, ticker, side.as_str(), quantity, &err.to_string()),
    }
    result
}
