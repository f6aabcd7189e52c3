use tracing::debug;

use common::Bar;

use crate::indicators::sma;
use crate::signal::{Signal, SignalSide};
use crate::Strategy;

// ─── Technical: SMA crossover ────────────────────────────────────────────────

/// Golden/death cross of a fast and slow simple moving average.
pub struct SmaCrossStrategy {
    symbol: String,
    fast: usize,
    slow: usize,
}

impl SmaCrossStrategy {
    pub const CONFIDENCE: f64 = 0.7;
    const MIN_CONFIDENCE: f64 = 0.5;

    pub fn new(symbol: impl Into<String>, fast: usize, slow: usize) -> Self {
        assert!(
            fast > 0 && fast < slow,
            "SMA cross fast period must be positive and less than slow period"
        );
        Self {
            symbol: symbol.into(),
            fast,
            slow,
        }
    }
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn analyze(&self, bars: &[Bar]) -> Option<Signal> {
        if bars.len() < self.slow + 1 {
            return None;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let prev = &closes[..closes.len() - 1];

        let (fast_now, slow_now) = (sma(&closes, self.fast)?, sma(&closes, self.slow)?);
        let (fast_prev, slow_prev) = (sma(prev, self.fast)?, sma(prev, self.slow)?);

        let side = if fast_now > slow_now && fast_prev <= slow_prev {
            SignalSide::Buy
        } else if fast_now < slow_now && fast_prev >= slow_prev {
            SignalSide::Sell
        } else {
            return None;
        };

        debug!(symbol = %self.symbol, ?side, fast_now, slow_now, "SMA crossover");
        Some(Signal {
            symbol: self.symbol.clone(),
            side,
            confidence: Self::CONFIDENCE,
            source: self.name().to_string(),
        })
    }

    fn validate_signal(&self, signal: &Signal) -> bool {
        signal.confidence > Self::MIN_CONFIDENCE
    }
}

// ─── External: signals produced elsewhere ────────────────────────────────────

/// Accepts signals generated outside the process (alerts, other models).
/// It never produces signals of its own.
pub struct ExternalSignalStrategy {
    symbol: String,
    min_confidence: f64,
}

impl ExternalSignalStrategy {
    pub fn new(symbol: impl Into<String>, min_confidence: f64) -> Self {
        Self {
            symbol: symbol.into(),
            min_confidence,
        }
    }
}

impl Strategy for ExternalSignalStrategy {
    fn name(&self) -> &str {
        "external_signal"
    }

    fn analyze(&self, _bars: &[Bar]) -> Option<Signal> {
        None
    }

    fn validate_signal(&self, signal: &Signal) -> bool {
        signal.symbol == self.symbol && signal.confidence >= self.min_confidence
    }
}
