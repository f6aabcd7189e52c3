use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use common::{Bar, Error, Result};
use paper::PaperClient;

use crate::decision::DecisionLoop;

/// The `lookback` bars ending at (and including) `end`.
fn window(bars: &[Bar], end: usize, lookback: usize) -> &[Bar] {
    &bars[(end + 1).saturating_sub(lookback)..=end]
}

/// Summary of one pass over recorded bars.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestReport {
    /// Ticks that produced a decision.
    pub ticks: usize,
    /// Ticks whose history was not ready.
    pub skipped: usize,
    /// Ticks that failed (e.g. an execution was rejected).
    pub errors: usize,
    pub trades_closed: usize,
    pub learning_steps: usize,
    pub total_reward: f64,
    pub realized_pnl: f64,
    pub final_epsilon: f64,
    pub open_position: bool,
}

/// Replays recorded bars through a `DecisionLoop`, filling through a
/// `PaperClient` priced at each bar's close.
///
/// The loop must have been built with `paper` as its exchange.
pub struct Backtester {
    decision: DecisionLoop,
    paper: Arc<PaperClient>,
}

impl Backtester {
    pub fn new(decision: DecisionLoop, paper: Arc<PaperClient>) -> Self {
        Self {
            decision: decision.with_save_on_learn(false),
            paper,
        }
    }

    pub fn decision(&self) -> &DecisionLoop {
        &self.decision
    }

    /// Walk `bars` (oldest first). Bar `i + 1` is the next state for bar `i`.
    /// The value table is saved once at the end when anything was learned.
    pub async fn run(&mut self, bars: &[Bar]) -> Result<BacktestReport> {
        let min_history = self.decision.min_history();
        if bars.len() < min_history {
            return Err(Error::DataUnavailable(format!(
                "backtest needs at least {min_history} bars, got {}",
                bars.len()
            )));
        }

        let lookback = self.decision.lookback();
        let symbol = self.decision.symbol().to_string();
        let mut report = BacktestReport::default();

        for i in min_history.saturating_sub(1)..bars.len() {
            self.paper.update_price(&symbol, bars[i].close).await;

            match self.decision.decide_and_act(window(bars, i, lookback)).await {
                Ok(Some(outcome)) => {
                    report.ticks += 1;
                    report.total_reward += outcome.reward;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(bar = i, error = %e, "Backtest tick failed");
                    report.errors += 1;
                }
            }

            if self.decision.learning_pending() {
                let next = (i + 1 < bars.len()).then(|| window(bars, i + 1, lookback));
                self.decision.complete_transition(next);
            }
        }

        self.decision.flush();

        let status = self.decision.status();
        report.trades_closed = self.decision.ledger().trades_closed();
        report.learning_steps = status.learning_steps;
        report.realized_pnl = status.realized_pnl;
        report.final_epsilon = status.epsilon;
        report.open_position = status.position.is_some();

        info!(
            symbol = %symbol,
            ticks = report.ticks,
            skipped = report.skipped,
            errors = report.errors,
            trades = report.trades_closed,
            learning_steps = report.learning_steps,
            total_reward = report.total_reward,
            realized_pnl = report.realized_pnl,
            epsilon = report.final_epsilon,
            "Backtest complete"
        );
        Ok(report)
    }
}
