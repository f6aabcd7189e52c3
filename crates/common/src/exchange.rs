use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Bar, Fill, Order, Result};

/// Source of recent OHLCV history for one instrument.
///
/// Returns bars oldest first, at most `lookback` of them. An empty or short
/// history is a normal "not ready" answer; transport failures are reported
/// as `Error::DataUnavailable`.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_history(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>>;
}

/// Abstraction over the broker connection.
///
/// `PaperClient` implements this for simulation and backtests. Only the
/// decision loop holds a reference to a `dyn ExchangeClient`; every order
/// passes the loop's risk gates first.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit a market order and return the fill confirmation.
    async fn submit_order(&self, order: &Order) -> Result<Fill>;

    /// Cash available for new positions, in quote currency.
    async fn available_cash(&self) -> Result<f64>;
}

/// Wall clock, injectable so tests and backtests control time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
