use crate::RunMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
///
/// Algorithm tuning (windows, hyperparameters, risk and reward constants)
/// lives in the TOML tuning file named by `tuning_config_path`.
#[derive(Debug, Clone)]
pub struct Config {
    // Instrument
    pub symbol: String,

    // Run
    pub run_mode: RunMode,
    pub bars_csv_path: String,
    pub tuning_config_path: String,

    // Value-table snapshot
    pub model_path: String,
    pub versioned_snapshots: bool,

    // Paper execution
    pub paper_starting_cash: f64,
    pub paper_slippage_bps: f64,

    /// Seeds the exploration RNG when set.
    pub rng_seed: Option<u64>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let run_mode = match required_env("RUN_MODE").to_lowercase().as_str() {
            "live" => RunMode::Live,
            "backtest" => RunMode::Backtest,
            other => panic!("ERROR: RUN_MODE must be 'live' or 'backtest', got: '{other}'"),
        };

        Config {
            symbol: required_env("SYMBOL"),
            run_mode,
            bars_csv_path: required_env("BARS_CSV_PATH"),
            tuning_config_path: optional_env("TUNING_CONFIG_PATH")
                .unwrap_or_else(|| "config/qbot.toml".to_string()),
            model_path: optional_env("MODEL_PATH").unwrap_or_else(|| "q_table.json".to_string()),
            versioned_snapshots: optional_env("VERSIONED_SNAPSHOTS")
                .map(|v| parse_bool("VERSIONED_SNAPSHOTS", &v))
                .unwrap_or(true),
            paper_starting_cash: optional_env("PAPER_STARTING_CASH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000.0),
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            rng_seed: optional_env("RNG_SEED").map(|v| {
                v.trim()
                    .parse::<u64>()
                    .unwrap_or_else(|_| panic!("RNG_SEED must be an unsigned integer, got: '{v}'"))
            }),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_bool(key: &str, value: &str) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => panic!("{key} must be a boolean, got: '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "TRUE"));
        assert!(parse_bool("X", " yes "));
        assert!(!parse_bool("X", "0"));
        assert!(!parse_bool("X", "off"));
    }

    #[test]
    #[should_panic(expected = "must be a boolean")]
    fn parse_bool_rejects_garbage() {
        parse_bool("X", "maybe");
    }
}
