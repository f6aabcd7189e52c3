use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use agent::Hyperparameters;
use common::{Error, Result};
use risk::RiskConfig;
use strategy::FeatureConfig;

use crate::reward::RewardConfig;

/// Timing and history length of the decision loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause between live ticks.
    pub tick_interval_secs: u64,
    /// Wait before re-querying market data for the next state.
    pub next_state_delay_ms: u64,
    /// Pause after a failed tick, instead of the tick interval.
    pub error_backoff_secs: u64,
    /// Bars requested from the market-data source per tick.
    pub lookback: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            next_state_delay_ms: 1_000,
            error_backoff_secs: 60,
            lookback: 1_000,
        }
    }
}

impl LoopConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn next_state_delay(&self) -> Duration {
        Duration::from_millis(self.next_state_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Algorithm tuning loaded from a TOML file.
///
/// ```toml
/// [features]
/// short_window = 5
/// long_window = 20
/// timezone = "America/New_York"
///
/// [agent]
/// alpha = 0.1
/// batch_size = 32
///
/// [risk]
/// stop_loss_pct = 0.02
///
/// [reward]
/// overtrade = -0.05
///
/// [loop]
/// tick_interval_secs = 60
/// ```
///
/// Every section and field is optional; omitted values take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningFile {
    pub features: FeatureConfig,
    pub agent: Hyperparameters,
    pub risk: RiskConfig,
    pub reward: RewardConfig,
    #[serde(rename = "loop")]
    pub schedule: LoopConfig,
}

impl TuningFile {
    /// Read and validate the tuning file. A missing file means all defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tuning = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No tuning file; using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reject settings the loop cannot run with. Window and timezone checks
    /// happen when the feature extractor is built.
    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;

        let risk = &self.risk;
        if !(risk.stop_loss_pct > 0.0 && risk.stop_loss_pct < 1.0) {
            return Err(Error::Config(format!(
                "risk.stop_loss_pct must be in (0, 1), got {}",
                risk.stop_loss_pct
            )));
        }
        if !(risk.take_profit_pct > 0.0 && risk.take_profit_pct.is_finite()) {
            return Err(Error::Config(format!(
                "risk.take_profit_pct must be positive, got {}",
                risk.take_profit_pct
            )));
        }
        if !(risk.max_position_size >= 1.0) {
            return Err(Error::Config(format!(
                "risk.max_position_size must be at least 1, got {}",
                risk.max_position_size
            )));
        }

        self.reward.validate()?;

        if self.schedule.lookback < self.features.long_window {
            return Err(Error::Config(format!(
                "loop.lookback ({}) is shorter than features.long_window ({})",
                self.schedule.lookback, self.features.long_window
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let tuning = TuningFile::from_toml_str("").unwrap();
        assert_eq!(tuning.features.long_window, 20);
        assert_eq!(tuning.agent.batch_size, 32);
        assert_eq!(tuning.risk.stop_loss_pct, 0.02);
        assert_eq!(tuning.reward.inactivity, -0.01);
        assert_eq!(tuning.schedule.tick_interval(), Duration::from_secs(60));
        assert_eq!(tuning.schedule.next_state_delay(), Duration::from_secs(1));
        assert!(tuning.validate().is_ok());
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let tuning = TuningFile::from_toml_str(
            r#"
            [agent]
            alpha = 0.5
            batch_size = 4

            [loop]
            tick_interval_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(tuning.agent.alpha, 0.5);
        assert_eq!(tuning.agent.batch_size, 4);
        assert_eq!(tuning.agent.gamma, 0.95);
        assert_eq!(tuning.schedule.tick_interval_secs, 5);
        assert_eq!(tuning.schedule.error_backoff_secs, 60);
    }

    #[test]
    fn invalid_hyperparameters_fail_validation() {
        let tuning = TuningFile::from_toml_str("[agent]\nalpha = 0.0\n").unwrap();
        assert!(matches!(tuning.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn lookback_shorter_than_long_window_fails_validation() {
        let tuning = TuningFile::from_toml_str("[loop]\nlookback = 10\n").unwrap();
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            TuningFile::from_toml_str("[agent\nalpha = "),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let tuning = TuningFile::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(tuning.schedule.lookback, 1_000);
    }
}
