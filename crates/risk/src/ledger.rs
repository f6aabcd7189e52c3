use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Position, PositionSide};

/// User-configurable risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Loss from entry that forces an exit (e.g. 0.02 = 2%).
    pub stop_loss_pct: f64,
    /// Gain from entry that forces an exit (e.g. 0.05 = 5%).
    pub take_profit_pct: f64,
    /// Maximum units held in the single position.
    pub max_position_size: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.02,
            take_profit_pct: 0.05,
            max_position_size: 100.0,
        }
    }
}

/// Protective exit that fires before the policy acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitTrigger::StopLoss => write!(f, "stop-loss"),
            ExitTrigger::TakeProfit => write!(f, "take-profit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The policy chose to sell.
    Signal,
    StopLoss,
    TakeProfit,
}

impl From<ExitTrigger> for CloseReason {
    fn from(trigger: ExitTrigger) -> Self {
        match trigger {
            ExitTrigger::StopLoss => CloseReason::StopLoss,
            ExitTrigger::TakeProfit => CloseReason::TakeProfit,
        }
    }
}

/// A completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub reason: CloseReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Units affordable for a new position: `min(max_size, floor(cash / price))`.
/// Zero for a non-positive or non-finite price.
pub fn position_size(available_cash: f64, price: f64, max_position_size: f64) -> f64 {
    if !(price.is_finite() && price > 0.0) || !available_cash.is_finite() {
        return 0.0;
    }
    (available_cash / price).floor().min(max_position_size).max(0.0)
}

/// Flat/Long state machine for one instrument.
///
/// At most one position exists at a time. Buying while long and selling or
/// checking exits while flat are ignored.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    symbol: String,
    config: RiskConfig,
    position: Option<Position>,
    realized_pnl: f64,
    trades_closed: usize,
}

impl PositionLedger {
    pub fn new(symbol: impl Into<String>, config: RiskConfig) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            position: None,
            realized_pnl: 0.0,
            trades_closed: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_long(&self) -> bool {
        self.position.is_some()
    }

    /// 1.0 when long, 0.0 when flat.
    pub fn position_sign(&self) -> f64 {
        if self.is_long() {
            1.0
        } else {
            0.0
        }
    }

    pub fn entry_price(&self) -> Option<f64> {
        self.position.as_ref().map(|p| p.entry_price)
    }

    /// Sum of realized P&L over all closed trades.
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn trades_closed(&self) -> usize {
        self.trades_closed
    }

    /// Flat → Long. Returns the new position, or `None` when already long
    /// or `quantity` is not positive.
    pub fn open(&mut self, quantity: f64, price: f64, at: DateTime<Utc>) -> Option<&Position> {
        if self.is_long() {
            debug!(symbol = %self.symbol, "Buy ignored: already long");
            return None;
        }
        if !(quantity > 0.0) || !(price > 0.0) {
            debug!(symbol = %self.symbol, quantity, price, "Buy rejected: nothing to open");
            return None;
        }

        let position = Position {
            symbol: self.symbol.clone(),
            side: PositionSide::Long,
            quantity,
            entry_price: price,
            stop_loss_price: Some(price * (1.0 - self.config.stop_loss_pct)),
            take_profit_price: Some(price * (1.0 + self.config.take_profit_pct)),
            opened_at: at,
        };
        info!(
            symbol = %self.symbol,
            qty = quantity,
            entry = price,
            stop = ?position.stop_loss_price,
            target = ?position.take_profit_price,
            "Position opened"
        );
        self.position = Some(position);
        self.position.as_ref()
    }

    /// Long → Flat at `price`. Returns the closed trade, or `None` when flat.
    pub fn close(&mut self, price: f64, at: DateTime<Utc>, reason: CloseReason) -> Option<ClosedTrade> {
        let position = self.position.take()?;
        let realized_pnl = (price - position.entry_price) * position.quantity;

        self.realized_pnl += realized_pnl;
        self.trades_closed += 1;
        info!(
            symbol = %self.symbol,
            entry = position.entry_price,
            exit = price,
            qty = position.quantity,
            pnl = realized_pnl,
            reason = ?reason,
            "Position closed"
        );

        Some(ClosedTrade {
            symbol: position.symbol,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: price,
            realized_pnl,
            reason,
            opened_at: position.opened_at,
            closed_at: at,
        })
    }

    /// Stop-loss fires iff `price <= entry * (1 - stop_pct)`; take-profit
    /// iff `price >= entry * (1 + take_pct)`. Stop-loss is checked first.
    pub fn check_exit(&self, price: f64) -> Option<ExitTrigger> {
        let position = self.position.as_ref()?;
        if price <= position.entry_price * (1.0 - self.config.stop_loss_pct) {
            Some(ExitTrigger::StopLoss)
        } else if price >= position.entry_price * (1.0 + self.config.take_profit_pct) {
            Some(ExitTrigger::TakeProfit)
        } else {
            None
        }
    }

    /// Mark-to-market loss magnitude per unit when long and underwater.
    pub fn underwater_by(&self, price: f64) -> Option<f64> {
        let entry = self.entry_price()?;
        (price < entry).then(|| entry - price)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> PositionLedger {
        PositionLedger::new(
            "AAPL",
            RiskConfig {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.05,
                max_position_size: 100.0,
            },
        )
    }

    fn long_at_100() -> PositionLedger {
        let mut ledger = ledger();
        ledger.open(100.0, 100.0, Utc::now()).expect("opened");
        ledger
    }

    #[test]
    fn buy_opens_with_fill_price_and_quantity() {
        let ledger = long_at_100();
        let position = ledger.position().unwrap();
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(position.quantity, 100.0);
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(ledger.position_sign(), 1.0);
    }

    #[test]
    fn sell_closes_and_clears_position() {
        let mut ledger = long_at_100();
        let trade = ledger.close(103.0, Utc::now(), CloseReason::Signal).unwrap();
        assert_eq!(trade.realized_pnl, 300.0);
        assert!(ledger.position().is_none());
        assert_eq!(ledger.entry_price(), None);
        assert_eq!(ledger.position_sign(), 0.0);
        assert_eq!(ledger.trades_closed(), 1);
    }

    #[test]
    fn stop_loss_fires_at_threshold() {
        let mut ledger = long_at_100();
        assert_eq!(ledger.check_exit(98.5), None);
        assert_eq!(ledger.check_exit(98.0), Some(ExitTrigger::StopLoss));
        assert_eq!(ledger.check_exit(94.0), Some(ExitTrigger::StopLoss));

        let trade = ledger.close(98.0, Utc::now(), ExitTrigger::StopLoss.into()).unwrap();
        assert_eq!(trade.realized_pnl, -200.0);
        assert_eq!(trade.reason, CloseReason::StopLoss);
    }

    #[test]
    fn take_profit_fires_at_threshold() {
        let mut ledger = long_at_100();
        assert_eq!(ledger.check_exit(104.9), None);
        assert_eq!(ledger.check_exit(106.0), Some(ExitTrigger::TakeProfit));

        let trade = ledger.close(106.0, Utc::now(), CloseReason::TakeProfit).unwrap();
        assert_eq!(trade.realized_pnl, 600.0);
    }

    #[test]
    fn flat_ledger_ignores_sell_and_exit_checks() {
        let mut ledger = ledger();
        assert!(ledger.close(100.0, Utc::now(), CloseReason::Signal).is_none());
        assert_eq!(ledger.check_exit(1.0), None);
        assert_eq!(ledger.underwater_by(1.0), None);
    }

    #[test]
    fn buy_while_long_is_ignored() {
        let mut ledger = long_at_100();
        assert!(ledger.open(5.0, 50.0, Utc::now()).is_none());
        assert_eq!(ledger.entry_price(), Some(100.0));
    }

    #[test]
    fn zero_quantity_buy_is_rejected() {
        let mut ledger = ledger();
        assert!(ledger.open(0.0, 100.0, Utc::now()).is_none());
        assert!(!ledger.is_long());
    }

    #[test]
    fn sizing_respects_cash_and_cap() {
        assert_eq!(position_size(10_000.0, 100.0, 100.0), 100.0);
        assert_eq!(position_size(10_000.0, 30.0, 1_000.0), 333.0);
        assert_eq!(position_size(50.0, 100.0, 100.0), 0.0);
        assert_eq!(position_size(10_000.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn underwater_measures_per_unit_loss() {
        let ledger = long_at_100();
        assert_eq!(ledger.underwater_by(99.0), Some(1.0));
        assert_eq!(ledger.underwater_by(101.0), None);
    }
}
