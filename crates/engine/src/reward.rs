use serde::{Deserialize, Serialize};

use agent::Action;
use common::{Error, Result};

/// Reward shaping terms added on every agent-driven tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Added every tick, whatever the action.
    pub inactivity: f64,
    /// Added when the chosen action is Buy or Sell.
    pub overtrade: f64,
    /// Per-unit-price penalty rate while long and below entry.
    pub holding_rate: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            inactivity: -0.01,
            overtrade: -0.05,
            holding_rate: 0.1,
        }
    }
}

impl RewardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.inactivity > 0.0 || self.overtrade > 0.0 || self.holding_rate < 0.0 {
            return Err(Error::Config(format!(
                "reward terms must be penalties: inactivity={}, overtrade={}, holding_rate={}",
                self.inactivity, self.overtrade, self.holding_rate
            )));
        }
        Ok(())
    }

    /// Reward for a tick where the agent's action was allowed to act.
    ///
    /// `realized_pnl` is the P&L of a position closed this tick (0 otherwise);
    /// `underwater_by` is `entry - price` when still long and below entry.
    pub fn shape(&self, action: Action, realized_pnl: f64, underwater_by: Option<f64>) -> f64 {
        let holding = underwater_by.map_or(0.0, |loss| -loss.abs() * self.holding_rate);
        let overtrade = if action.is_trade() { self.overtrade } else { 0.0 };
        realized_pnl + (self.inactivity + holding + overtrade)
    }
}
