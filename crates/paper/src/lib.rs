use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use common::{Clock, Error, ExchangeClient, Fill, Order, OrderSide, Result, SystemClock};

pub mod feed;

pub use feed::{load_bars_csv, ReplayFeed};

/// Holdings below this are treated as fully sold.
const QTY_EPSILON: f64 = 1e-9;
/// Relative slack for buys sized to exactly the available cash.
const CASH_TOLERANCE: f64 = 1e-9;

/// Simulated exchange client for paper trading and backtests.
///
/// Fills are simulated at the latest known price with configurable slippage.
/// Cash and per-symbol holdings are tracked so that a buy the account cannot
/// pay for, or a sell of something not held, fails like a real broker would.
pub struct PaperClient {
    /// Simulated cash in quote currency.
    cash: Arc<RwLock<f64>>,
    /// Units held per symbol.
    holdings: Arc<RwLock<HashMap<String, f64>>>,
    /// Latest known price per symbol, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
    clock: Arc<dyn Clock>,
}

impl PaperClient {
    pub fn new(starting_cash: f64, slippage_bps: f64) -> Self {
        info!(
            cash = starting_cash,
            slippage_bps = slippage_bps,
            "PaperClient initialized"
        );
        Self {
            cash: Arc::new(RwLock::new(starting_cash)),
            holdings: Arc::new(RwLock::new(HashMap::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp fills with `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Update the latest price for a symbol (called by the market feed).
    pub async fn update_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub async fn holding(&self, symbol: &str) -> f64 {
        self.holdings.read().await.get(symbol).copied().unwrap_or(0.0)
    }

    /// Cash plus holdings marked at the latest known prices.
    pub async fn equity(&self) -> f64 {
        let cash = *self.cash.read().await;
        let holdings = self.holdings.read().await;
        let prices = self.prices.read().await;
        cash + holdings
            .iter()
            .map(|(symbol, qty)| qty * prices.get(symbol).copied().unwrap_or(0.0))
            .sum::<f64>()
    }

    fn fill_price(&self, side: OrderSide, mid_price: f64) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid_price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid_price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        if !(order.quantity > 0.0) {
            return Err(Error::Execution(format!(
                "Order quantity must be positive, got {}",
                order.quantity
            )));
        }

        let mid_price = self
            .prices
            .read()
            .await
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| {
                Error::Execution(format!(
                    "PaperClient has no price for '{}'. Ensure market data is flowing.",
                    order.symbol
                ))
            })?;
        let fill_price = self.fill_price(order.side, mid_price);
        let notional = fill_price * order.quantity;

        let mut cash = self.cash.write().await;
        let mut holdings = self.holdings.write().await;
        match order.side {
            OrderSide::Buy => {
                if notional - *cash > CASH_TOLERANCE * cash.abs().max(1.0) {
                    warn!(symbol = %order.symbol, notional, cash = *cash, "Paper buy rejected");
                    return Err(Error::Execution(format!(
                        "Insufficient cash: need {notional:.2}, have {:.2}",
                        *cash
                    )));
                }
                *cash = (*cash - notional).max(0.0);
                *holdings.entry(order.symbol.clone()).or_insert(0.0) += order.quantity;
            }
            OrderSide::Sell => {
                let held = holdings.get(&order.symbol).copied().unwrap_or(0.0);
                if held + QTY_EPSILON < order.quantity {
                    warn!(symbol = %order.symbol, held, qty = order.quantity, "Paper sell rejected");
                    return Err(Error::Execution(format!(
                        "Cannot sell {} {}: only {held} held",
                        order.quantity, order.symbol
                    )));
                }
                *cash += notional;
                let remaining = held - order.quantity;
                if remaining <= QTY_EPSILON {
                    holdings.remove(&order.symbol);
                } else {
                    holdings.insert(order.symbol.clone(), remaining);
                }
            }
        }

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            mid = mid_price,
            fill = fill_price,
            qty = order.quantity,
            cash = *cash,
            "Paper fill simulated"
        );

        Ok(Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            filled_price: fill_price,
            filled_quantity: order.quantity,
            timestamp: self.clock.now(),
        })
    }

    async fn available_cash(&self) -> Result<f64> {
        Ok(*self.cash.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paper_buy_fill_applies_positive_slippage() {
        let client = PaperClient::new(10_000.0, 10.0); // 10 bps
        client.update_price("AAPL", 100.0).await;

        let order = Order::market("AAPL", OrderSide::Buy, 1.0);
        let fill = client.submit_order(&order).await.unwrap();

        let expected = 100.0 * (1.0 + 10.0 / 10_000.0);
        assert!(
            (fill.filled_price - expected).abs() < 1e-9,
            "Buy fill price {}, expected {}",
            fill.filled_price,
            expected
        );
        assert_eq!(fill.filled_quantity, 1.0);
    }

    #[tokio::test]
    async fn paper_sell_fill_applies_negative_slippage() {
        let client = PaperClient::new(10_000.0, 10.0);
        client.update_price("AAPL", 100.0).await;

        let buy = Order::market("AAPL", OrderSide::Buy, 1.0);
        client.submit_order(&buy).await.unwrap();

        let sell = Order::market("AAPL", OrderSide::Sell, 1.0);
        let fill = client.submit_order(&sell).await.unwrap();

        let expected = 100.0 * (1.0 - 10.0 / 10_000.0);
        assert!((fill.filled_price - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cash_moves_with_fills() {
        let client = PaperClient::new(10_000.0, 0.0);
        client.update_price("AAPL", 100.0).await;

        client
            .submit_order(&Order::market("AAPL", OrderSide::Buy, 40.0))
            .await
            .unwrap();
        assert_eq!(client.available_cash().await.unwrap(), 6_000.0);
        assert_eq!(client.holding("AAPL").await, 40.0);

        client.update_price("AAPL", 110.0).await;
        assert_eq!(client.equity().await, 6_000.0 + 40.0 * 110.0);

        client
            .submit_order(&Order::market("AAPL", OrderSide::Sell, 40.0))
            .await
            .unwrap();
        assert_eq!(client.available_cash().await.unwrap(), 10_400.0);
        assert_eq!(client.holding("AAPL").await, 0.0);
    }

    #[tokio::test]
    async fn buy_beyond_cash_is_rejected() {
        let client = PaperClient::new(500.0, 0.0);
        client.update_price("AAPL", 100.0).await;

        let err = client
            .submit_order(&Order::market("AAPL", OrderSide::Buy, 6.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert_eq!(client.available_cash().await.unwrap(), 500.0);
    }

    #[tokio::test]
    async fn sell_without_holdings_is_rejected() {
        let client = PaperClient::new(500.0, 0.0);
        client.update_price("AAPL", 100.0).await;

        let err = client
            .submit_order(&Order::market("AAPL", OrderSide::Sell, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }

    #[tokio::test]
    async fn missing_price_is_an_execution_failure() {
        let client = PaperClient::new(500.0, 0.0);
        let err = client
            .submit_order(&Order::market("AAPL", OrderSide::Buy, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
