use chrono::Timelike;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use common::{Bar, Error, Result};

use crate::indicators::{momentum, return_volatility, sma, RsiIndicator};

/// Window lengths and trading timezone for state derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub short_window: usize,
    pub long_window: usize,
    pub momentum_window: usize,
    pub rsi_window: usize,
    pub volatility_window: usize,
    /// IANA name of the exchange-local timezone used for `time_of_day`.
    pub timezone: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 20,
            momentum_window: 5,
            rsi_window: 14,
            volatility_window: 10,
            timezone: "America/New_York".to_string(),
        }
    }
}

/// Compact numeric market state fed to the policy.
///
/// Every component is finite. Indicators that cannot be computed are
/// replaced by neutral values (RSI 50, volatility 0, momentum 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub short_ma: f64,
    pub long_ma: f64,
    /// 0 when flat, 1 when long.
    pub position_sign: f64,
    pub momentum: f64,
    pub rsi: f64,
    pub volatility: f64,
    /// Local hour plus minutes as a fraction, e.g. 13.5 for 1:30pm.
    pub time_of_day: f64,
}

impl StateVector {
    pub const LEN: usize = 7;

    pub fn with_position_sign(mut self, sign: f64) -> Self {
        self.position_sign = sign;
        self
    }

    /// Components in their fixed order.
    pub fn to_array(&self) -> [f64; Self::LEN] {
        [
            self.short_ma,
            self.long_ma,
            self.position_sign,
            self.momentum,
            self.rsi,
            self.volatility,
            self.time_of_day,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Derives a `StateVector` from a bar history.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    cfg: FeatureConfig,
    tz: Tz,
    rsi: RsiIndicator,
}

impl FeatureExtractor {
    pub fn new(cfg: FeatureConfig) -> Result<Self> {
        if cfg.short_window == 0 || cfg.long_window == 0 {
            return Err(Error::Config("moving-average windows must be positive".into()));
        }
        if cfg.short_window > cfg.long_window {
            return Err(Error::Config(format!(
                "short_window ({}) must not exceed long_window ({})",
                cfg.short_window, cfg.long_window
            )));
        }
        if cfg.rsi_window == 0 {
            return Err(Error::Config("rsi_window must be positive".into()));
        }
        let tz: Tz = cfg
            .timezone
            .parse()
            .map_err(|e| Error::Config(format!("unknown timezone '{}': {e}", cfg.timezone)))?;

        Ok(Self {
            rsi: RsiIndicator::new(cfg.rsi_window),
            tz,
            cfg,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.cfg
    }

    /// Minimum history length for `extract` to produce a state.
    pub fn min_history(&self) -> usize {
        self.cfg.long_window
    }

    /// Compute the state for the most recent bar of `history`.
    ///
    /// Returns `None` ("not ready") when the history is shorter than
    /// `long_window` or the moving averages are not finite. `position_sign`
    /// is left at 0; the caller folds in the ledger side.
    pub fn extract(&self, history: &[Bar]) -> Option<StateVector> {
        if history.len() < self.cfg.long_window {
            return None;
        }
        let last = history.last()?;
        let closes: Vec<f64> = history.iter().map(|b| b.close).collect();

        let (short_ma, long_ma) = match (
            sma(&closes, self.cfg.short_window),
            sma(&closes, self.cfg.long_window),
        ) {
            (Some(s), Some(l)) => (s, l),
            _ => {
                warn!(bars = history.len(), "Moving averages not finite; treating history as not ready");
                return None;
            }
        };

        let local = last.timestamp.with_timezone(&self.tz);
        let time_of_day = local.hour() as f64 + local.minute() as f64 / 60.0;

        Some(StateVector {
            short_ma,
            long_ma,
            position_sign: 0.0,
            momentum: momentum(&closes, self.cfg.momentum_window).unwrap_or(0.0),
            rsi: self.rsi.compute_or_neutral(&closes),
            volatility: return_volatility(&closes, self.cfg.volatility_window).unwrap_or(0.0),
            time_of_day,
        })
    }
}
