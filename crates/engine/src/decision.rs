use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use agent::{Action, PolicyAgent, Transition};
use common::{
    Bar, Error, ExchangeClient, Fill, MarketDataSource, Order, OrderSide, Position, Result,
};
use risk::{position_size, ClosedTrade, CloseReason, ExitTrigger, PositionLedger};
use strategy::{FeatureExtractor, StateVector};

use crate::config::{LoopConfig, TuningFile};
use crate::reward::RewardConfig;

/// Cloneable handle used to stop a running loop from another task.
#[derive(Clone)]
pub struct LoopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl LoopHandle {
    /// Request a cooperative stop. The loop finishes its current tick first.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// What happened on one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// The agent's action, or `Sell` for a forced exit.
    pub action: Action,
    /// Set when a stop-loss or take-profit closed the position.
    pub trigger: Option<ExitTrigger>,
    /// Whether an order was filled this tick.
    pub executed: bool,
    pub price: f64,
    pub reward: f64,
    pub position_after: Option<Position>,
    pub closed_trade: Option<ClosedTrade>,
}

/// Observability snapshot of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatus {
    pub epsilon: f64,
    pub table_size: usize,
    pub replay_size: usize,
    pub position: Option<Position>,
    pub learning_steps: usize,
    pub realized_pnl: f64,
    pub save_pending: bool,
}

/// Agent-closed trade waiting for its next state before it is learned from.
#[derive(Debug, Clone, Copy)]
struct PendingTransition {
    state: StateVector,
    action: Action,
    reward: f64,
}

/// One instrument's extract → act → reward → learn cycle.
///
/// Owns the agent and the ledger exclusively. Only round trips the agent
/// closes itself become learning transitions.
pub struct DecisionLoop {
    symbol: String,
    extractor: FeatureExtractor,
    agent: PolicyAgent,
    ledger: PositionLedger,
    reward: RewardConfig,
    schedule: LoopConfig,
    feed: Arc<dyn MarketDataSource>,
    exchange: Arc<dyn ExchangeClient>,
    versioned_snapshots: bool,
    save_on_learn: bool,
    save_pending: bool,
    pending: Option<PendingTransition>,
    learning_steps: usize,
    stop_rx: watch::Receiver<bool>,
}

impl DecisionLoop {
    pub fn new(
        symbol: impl Into<String>,
        tuning: &TuningFile,
        agent: PolicyAgent,
        feed: Arc<dyn MarketDataSource>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Result<(Self, LoopHandle)> {
        let symbol = symbol.into();
        let extractor = FeatureExtractor::new(tuning.features.clone())?;
        let (stop_tx, stop_rx) = watch::channel(false);

        let decision = DecisionLoop {
            ledger: PositionLedger::new(symbol.clone(), tuning.risk.clone()),
            symbol,
            extractor,
            agent,
            reward: tuning.reward.clone(),
            schedule: tuning.schedule.clone(),
            feed,
            exchange,
            versioned_snapshots: true,
            save_on_learn: true,
            save_pending: false,
            pending: None,
            learning_steps: 0,
            stop_rx,
        };
        let handle = LoopHandle {
            stop_tx: Arc::new(stop_tx),
        };
        Ok((decision, handle))
    }

    /// Whether snapshots get a timestamp suffix. Defaults to `true`.
    pub fn with_versioned_snapshots(mut self, versioned: bool) -> Self {
        self.versioned_snapshots = versioned;
        self
    }

    /// When `false`, learning only marks the table dirty and `flush` saves.
    pub fn with_save_on_learn(mut self, save_on_learn: bool) -> Self {
        self.save_on_learn = save_on_learn;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn min_history(&self) -> usize {
        self.extractor.min_history()
    }

    pub fn lookback(&self) -> usize {
        self.schedule.lookback
    }

    pub fn agent(&self) -> &PolicyAgent {
        &self.agent
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// True between an agent-initiated close and `complete_transition`.
    pub fn learning_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus {
            epsilon: self.agent.epsilon(),
            table_size: self.agent.table().len(),
            replay_size: self.agent.replay().len(),
            position: self.ledger.position().cloned(),
            learning_steps: self.learning_steps,
            realized_pnl: self.ledger.realized_pnl(),
            save_pending: self.save_pending,
        }
    }

    /// Run one decision on `history` (oldest first).
    ///
    /// A trade left pending by the previous call is learned first, with
    /// `history` as its next observation. Returns `Ok(None)` when the history
    /// is not ready. An execution failure returns the error with the ledger
    /// unchanged and no reward.
    pub async fn decide_and_act(&mut self, history: &[Bar]) -> Result<Option<TickOutcome>> {
        if self.pending.is_some() {
            debug!(symbol = %self.symbol, "Completing pending transition from this tick");
            self.complete_transition(Some(history));
        }

        let Some(features) = self.extractor.extract(history) else {
            debug!(symbol = %self.symbol, bars = history.len(), "History not ready; skipping tick");
            return Ok(None);
        };
        let Some(last) = history.last() else {
            return Ok(None);
        };
        let price = last.close;
        let state = features.with_position_sign(self.ledger.position_sign());

        // Protective exits pre-empt the agent.
        if let Some(trigger) = self.ledger.check_exit(price) {
            let fill = self.submit_close().await?;
            let trade = self.ledger.close(fill.filled_price, fill.timestamp, trigger.into());
            let reward = trade.as_ref().map_or(0.0, |t| t.realized_pnl);
            info!(symbol = %self.symbol, %trigger, price, reward, "Forced exit");
            return Ok(Some(TickOutcome {
                action: Action::Sell,
                trigger: Some(trigger),
                executed: true,
                price,
                reward,
                position_after: None,
                closed_trade: trade,
            }));
        }

        let action = self.agent.select_action(&state);
        let entry_before = self.ledger.entry_price();

        let mut executed = false;
        let mut closed_trade = None;
        match action {
            Action::Buy => {
                if let Some(fill) = self.try_open(price).await? {
                    self.ledger
                        .open(fill.filled_quantity, fill.filled_price, fill.timestamp);
                    executed = true;
                }
            }
            Action::Sell => {
                if self.ledger.is_long() {
                    let fill = self.submit_close().await?;
                    closed_trade =
                        self.ledger
                            .close(fill.filled_price, fill.timestamp, CloseReason::Signal);
                    executed = true;
                } else {
                    debug!(symbol = %self.symbol, "Sell ignored: flat");
                }
            }
            Action::Hold => {}
        }

        let realized = closed_trade.as_ref().map_or(0.0, |t| t.realized_pnl);
        let reward = self
            .reward
            .shape(action, realized, self.ledger.underwater_by(price));

        if action == Action::Sell && executed && entry_before.is_some() {
            self.pending = Some(PendingTransition {
                state,
                action,
                reward,
            });
        }

        info!(
            symbol = %self.symbol,
            %action,
            executed,
            price,
            reward,
            long = self.ledger.is_long(),
            "Tick decided"
        );
        Ok(Some(TickOutcome {
            action,
            trigger: None,
            executed,
            price,
            reward,
            position_after: self.ledger.position().cloned(),
            closed_trade,
        }))
    }

    /// Turn the pending agent-closed trade into a transition and learn.
    ///
    /// `next_history` is the observation after the trade; when it is missing
    /// or not ready the current state stands in for the next one. Returns
    /// the number of TD updates applied, or `None` if nothing was pending.
    pub fn complete_transition(&mut self, next_history: Option<&[Bar]>) -> Option<usize> {
        let pending = self.pending.take()?;

        let next_state = match next_history.and_then(|h| self.extractor.extract(h)) {
            Some(features) => features.with_position_sign(self.ledger.position_sign()),
            None => {
                debug!(symbol = %self.symbol, "Next state unavailable; reusing current state");
                pending.state
            }
        };

        let updates = self.agent.store_and_learn(Transition {
            state: pending.state,
            action: pending.action,
            reward: pending.reward,
            next_state,
            done: false,
        });
        self.learning_steps += 1;
        info!(
            symbol = %self.symbol,
            reward = pending.reward,
            updates,
            epsilon = self.agent.epsilon(),
            "Learned from closed trade"
        );

        if self.agent.has_store() {
            self.save_pending = true;
            if self.save_on_learn {
                self.try_save();
            }
        }
        Some(updates)
    }

    /// Save the table if a previous save failed or was deferred.
    pub fn flush(&mut self) -> bool {
        if self.save_pending {
            self.try_save()
        } else {
            true
        }
    }

    fn try_save(&mut self) -> bool {
        match self.agent.save(self.versioned_snapshots) {
            Ok(_) => {
                self.save_pending = false;
                true
            }
            Err(e) => {
                warn!(error = %e, "Value table save failed; will retry");
                false
            }
        }
    }

    /// One live tick: fetch, decide, and when an agent close needs it, wait
    /// and re-query for the next state before learning.
    pub async fn tick(&mut self) -> Result<Option<TickOutcome>> {
        let history = self
            .feed
            .get_history(&self.symbol, self.schedule.lookback)
            .await?;
        let outcome = self.decide_and_act(&history).await?;

        if self.learning_pending() {
            tokio::time::sleep(self.schedule.next_state_delay()).await;
            let next = match self.feed.get_history(&self.symbol, self.schedule.lookback).await {
                Ok(bars) => Some(bars),
                Err(e) => {
                    debug!(error = %e, "Next-state query failed");
                    None
                }
            };
            self.complete_transition(next.as_deref());
        }
        Ok(outcome)
    }

    /// Tick until stopped through the `LoopHandle`. A failed tick is logged
    /// and followed by the error backoff; it never ends the loop.
    pub async fn run(&mut self) {
        info!(
            symbol = %self.symbol,
            interval_secs = self.schedule.tick_interval_secs,
            "Decision loop started"
        );

        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            let wait = match self.tick().await {
                Ok(_) => self.schedule.tick_interval(),
                Err(e) => {
                    match &e {
                        Error::Execution(_) => error!(symbol = %self.symbol, error = %e, "Tick failed"),
                        e if e.is_transient() => warn!(symbol = %self.symbol, error = %e, "Tick skipped"),
                        e => error!(symbol = %self.symbol, error = %e, "Tick failed"),
                    }
                    self.schedule.error_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        warn!("Loop handle dropped; stopping");
                        break;
                    }
                }
            }
        }

        self.flush();
        let status = self.status();
        info!(
            symbol = %self.symbol,
            epsilon = status.epsilon,
            states = status.table_size,
            learning_steps = status.learning_steps,
            realized_pnl = status.realized_pnl,
            "Decision loop stopped"
        );
    }

    async fn try_open(&self, price: f64) -> Result<Option<Fill>> {
        if self.ledger.is_long() {
            debug!(symbol = %self.symbol, "Buy ignored: already long");
            return Ok(None);
        }
        let cash = self.exchange.available_cash().await?;
        let quantity = position_size(cash, price, self.ledger.config().max_position_size);
        if quantity <= 0.0 {
            debug!(symbol = %self.symbol, cash, price, "Buy rejected: size is zero");
            return Ok(None);
        }
        let order = Order::market(self.symbol.clone(), OrderSide::Buy, quantity);
        self.exchange.submit_order(&order).await.map(Some)
    }

    async fn submit_close(&self) -> Result<Fill> {
        let quantity = self
            .ledger
            .position()
            .map(|p| p.quantity)
            .ok_or_else(|| Error::Execution("no open position to close".into()))?;
        let order = Order::market(self.symbol.clone(), OrderSide::Sell, quantity);
        self.exchange.submit_order(&order).await
    }
}
