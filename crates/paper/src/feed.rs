use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use common::{Bar, Error, MarketDataSource, Result};

use crate::PaperClient;

/// Read recorded bars from a CSV file with the header
/// `timestamp,open,high,low,close,volume` (RFC3339 timestamps).
///
/// Rows are returned oldest first regardless of file order.
pub fn load_bars_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let mut bars = reader
        .deserialize::<Bar>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    bars.sort_by_key(|bar| bar.timestamp);

    info!(path = %path.display(), bars = bars.len(), "Loaded recorded bars");
    Ok(bars)
}

/// Market-data source that replays a recorded bar series.
///
/// Starts with `warmup` bars visible and releases one more bar on every
/// `get_history` call, simulating time passing between polls. Each newly
/// released close is pushed to the attached `PaperClient`, if any, so fills
/// price at the bar the loop just observed.
pub struct ReplayFeed {
    symbol: String,
    bars: Vec<Bar>,
    released: AtomicUsize,
    price_sink: Option<Arc<PaperClient>>,
}

impl ReplayFeed {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>, warmup: usize) -> Self {
        let released = warmup.min(bars.len());
        Self {
            symbol: symbol.into(),
            bars,
            released: AtomicUsize::new(released),
            price_sink: None,
        }
    }

    pub fn with_price_sink(mut self, client: Arc<PaperClient>) -> Self {
        self.price_sink = Some(client);
        self
    }

    /// Number of bars visible to the next `get_history` call before it
    /// releases another one.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.released() >= self.bars.len()
    }
}

#[async_trait]
impl MarketDataSource for ReplayFeed {
    async fn get_history(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>> {
        if symbol != self.symbol {
            return Err(Error::DataUnavailable(format!(
                "ReplayFeed serves '{}', not '{symbol}'",
                self.symbol
            )));
        }

        let total = self.bars.len();
        let visible = self
            .released
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < total).then_some(n + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| Error::DataUnavailable("Recorded bars exhausted".into()))?;

        let bar = &self.bars[visible - 1];
        if let Some(client) = &self.price_sink {
            client.update_price(&self.symbol, bar.close).await;
        }
        debug!(symbol, released = visible, close = bar.close, "Replay bar released");

        let start = visible.saturating_sub(lookback);
        Ok(self.bars[start..visible].to_vec())
    }
}
