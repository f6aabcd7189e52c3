//! Decision loop orchestration: features → policy → risk gates → execution
//! → reward → learning, live or over recorded bars.

pub mod backtest;
pub mod config;
pub mod decision;
pub mod reward;

pub use backtest::{BacktestReport, Backtester};
pub use config::{LoopConfig, TuningFile};
pub use decision::{DecisionLoop, LoopHandle, LoopStatus, TickOutcome};
pub use reward::RewardConfig;
