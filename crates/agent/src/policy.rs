use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::{Error, Result};
use strategy::StateVector;

use crate::replay::{ReplayBuffer, Transition};
use crate::snapshot::TableStore;
use crate::table::{best_action, max_value, Action, StateKey, ValueTable};

/// Learning hyperparameters. Immutable after construction except for the
/// live exploration rate, which the agent tracks separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Learning rate, in (0, 1].
    pub alpha: f64,
    /// Discount factor, in [0, 1].
    pub gamma: f64,
    /// Initial exploration rate, in [0, 1].
    pub epsilon: f64,
    pub epsilon_min: f64,
    /// Multiplicative decay applied after every learning trigger, in (0, 1].
    pub epsilon_decay: f64,
    pub replay_capacity: usize,
    pub batch_size: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.95,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            replay_capacity: 1000,
            batch_size: 32,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Error::Config(format!("alpha must be in (0, 1], got {}", self.alpha)));
        }
        if !unit.contains(&self.gamma) {
            return Err(Error::Config(format!("gamma must be in [0, 1], got {}", self.gamma)));
        }
        if !unit.contains(&self.epsilon) || !unit.contains(&self.epsilon_min) {
            return Err(Error::Config(format!(
                "epsilon ({}) and epsilon_min ({}) must be in [0, 1]",
                self.epsilon, self.epsilon_min
            )));
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return Err(Error::Config(format!(
                "epsilon_decay must be in (0, 1], got {}",
                self.epsilon_decay
            )));
        }
        if self.replay_capacity == 0 || self.batch_size == 0 {
            return Err(Error::Config("replay_capacity and batch_size must be positive".into()));
        }
        if self.batch_size > self.replay_capacity {
            return Err(Error::Config(format!(
                "batch_size ({}) exceeds replay_capacity ({}); learning would never run",
                self.batch_size, self.replay_capacity
            )));
        }
        Ok(())
    }
}

/// Epsilon-greedy tabular Q-learning agent.
///
/// Owns the value table and replay buffer exclusively. The table changes
/// only through the TD update applied in `store_and_learn`.
pub struct PolicyAgent {
    hp: Hyperparameters,
    epsilon: f64,
    table: ValueTable,
    replay: ReplayBuffer,
    rng: StdRng,
    store: Option<TableStore>,
}

impl PolicyAgent {
    pub fn new(hp: Hyperparameters) -> Result<Self> {
        hp.validate()?;
        Ok(Self {
            epsilon: hp.epsilon,
            replay: ReplayBuffer::new(hp.replay_capacity),
            table: ValueTable::new(),
            rng: StdRng::from_entropy(),
            store: None,
            hp,
        })
    }

    /// Make exploration and replay sampling reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_store(mut self, store: TableStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Start from an existing table instead of an empty one.
    pub fn with_table(mut self, table: ValueTable) -> Self {
        self.table = table;
        self
    }

    /// Epsilon-greedy choice. Unseen states fall back to a random action.
    pub fn select_action(&mut self, state: &StateVector) -> Action {
        if self.rng.gen::<f64>() < self.epsilon {
            return self.random_action();
        }
        match self.table.get(&StateKey::from_state(state)) {
            Some(row) => best_action(row),
            None => self.random_action(),
        }
    }

    fn random_action(&mut self) -> Action {
        Action::ALL[self.rng.gen_range(0..Action::COUNT)]
    }

    /// Record a transition, replay a batch once enough experience exists,
    /// then decay epsilon. Returns the number of TD updates applied.
    pub fn store_and_learn(&mut self, transition: Transition) -> usize {
        self.replay.push(transition);

        let mut updates = 0;
        if self.replay.len() >= self.hp.batch_size {
            match self.replay.sample(self.hp.batch_size, &mut self.rng) {
                Ok(batch) => {
                    // Updates are applied in sequence against the live table.
                    for t in &batch {
                        self.td_update(t);
                    }
                    updates = batch.len();
                }
                Err(e) => debug!(error = %e, "Skipping replay step"),
            }
        }

        self.epsilon = (self.epsilon * self.hp.epsilon_decay).max(self.hp.epsilon_min);
        debug!(
            updates,
            epsilon = self.epsilon,
            replay = self.replay.len(),
            states = self.table.len(),
            "Learning step complete"
        );
        updates
    }

    fn td_update(&mut self, t: &Transition) {
        let key = StateKey::from_state(&t.state);
        let next_key = StateKey::from_state(&t.next_state);

        self.table.row_mut(key);
        let next_max = max_value(self.table.row_mut(next_key));
        let target = if t.done {
            t.reward
        } else {
            t.reward + self.hp.gamma * next_max
        };

        let q = &mut self.table.row_mut(key)[t.action.index()];
        *q += self.hp.alpha * (target - *q);
    }

    /// Persist the value table. The in-memory table stays authoritative
    /// whether or not this succeeds.
    pub fn save(&self, versioned: bool) -> Result<PathBuf> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Persistence("no snapshot store configured".into()))?;
        store.save(&self.table, versioned)
    }

    /// Replace the table with the persisted snapshot, if one exists.
    ///
    /// A missing snapshot leaves the current table untouched. An unreadable
    /// one resets the agent to an empty table (cold start). Returns whether a
    /// snapshot was loaded.
    pub fn load(&mut self, versioned: bool) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.load(versioned) {
            Ok(Some(table)) => {
                self.table = table;
                true
            }
            Ok(None) => {
                info!(path = %store.path().display(), "No value-table snapshot found");
                false
            }
            Err(e) => {
                warn!(error = %e, "Value-table snapshot unusable; starting cold");
                self.table = ValueTable::new();
                false
            }
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hp
    }

    pub fn table(&self) -> &ValueTable {
        &self.table
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use common::FixedClock;

    fn state(short_ma: f64, position_sign: f64) -> StateVector {
        StateVector {
            short_ma,
            long_ma: 100.0,
            position_sign,
            momentum: 0.0,
            rsi: 50.0,
            volatility: 0.0,
            time_of_day: 10.5,
        }
    }

    fn hp(batch_size: usize) -> Hyperparameters {
        Hyperparameters {
            alpha: 0.5,
            gamma: 0.9,
            epsilon: 0.0,
            epsilon_min: 0.0,
            epsilon_decay: 1.0,
            replay_capacity: 100,
            batch_size,
        }
    }

    fn transition(s: StateVector, action: Action, reward: f64, next: StateVector, done: bool) -> Transition {
        Transition {
            state: s,
            action,
            reward,
            next_state: next,
            done,
        }
    }

    #[test]
    fn select_action_always_returns_a_valid_action() {
        let mut agent = PolicyAgent::new(Hyperparameters::default()).unwrap().with_seed(1);
        for i in 0..200 {
            let action = agent.select_action(&state(i as f64, 0.0));
            assert!(Action::ALL.contains(&action));
        }
    }

    #[test]
    fn greedy_selection_follows_the_argmax_row() {
        let s = state(101.0, 0.0);
        let table = ValueTable::from_rows([
            (StateKey::from_state(&s), [0.1, 0.7, 0.7]),
            (StateKey::from_state(&s.with_position_sign(1.0)), [0.0, -1.0, 2.0]),
        ]);
        let mut agent = PolicyAgent::new(hp(1)).unwrap().with_table(table).with_seed(3);
        for _ in 0..50 {
            assert_eq!(agent.select_action(&s), Action::Buy);
            assert_eq!(agent.select_action(&s.with_position_sign(1.0)), Action::Sell);
        }
    }

    #[test]
    fn unseen_state_explores_all_actions() {
        let mut agent = PolicyAgent::new(hp(1)).unwrap().with_seed(11);
        let mut seen = [false; 3];
        for _ in 0..300 {
            seen[agent.select_action(&state(1.0, 0.0)).index()] = true;
        }
        assert_eq!(seen, [true; 3]);
        assert!(agent.table().is_empty(), "selection must not touch the table");
    }

    #[test]
    fn below_batch_size_leaves_table_unchanged() {
        let mut agent = PolicyAgent::new(hp(3)).unwrap();
        let s = state(100.0, 1.0);
        assert_eq!(agent.store_and_learn(transition(s, Action::Sell, 5.0, s, false)), 0);
        assert_eq!(agent.store_and_learn(transition(s, Action::Sell, 5.0, s, false)), 0);
        assert!(agent.table().is_empty());
        assert_eq!(agent.replay().len(), 2);
        assert_eq!(agent.store_and_learn(transition(s, Action::Sell, 5.0, s, false)), 3);
        assert!(!agent.table().is_empty());
    }

    #[test]
    fn terminal_update_has_no_bootstrap_term() {
        let s = state(100.0, 1.0);
        let next = state(105.0, 0.0);
        let key = StateKey::from_state(&s);
        let table = ValueTable::from_rows([
            (key, [0.0, 0.0, 2.0]),
            (StateKey::from_state(&next), [10.0, 10.0, 10.0]),
        ]);
        let mut agent = PolicyAgent::new(hp(1)).unwrap().with_table(table);

        agent.store_and_learn(transition(s, Action::Sell, 6.0, next, true));
        // 2 + 0.5 * (6 - 2)
        assert_eq!(agent.table().get(&key).unwrap()[2], 4.0);
    }

    #[test]
    fn continuing_update_bootstraps_from_next_row() {
        let s = state(100.0, 1.0);
        let next = state(105.0, 0.0);
        let key = StateKey::from_state(&s);
        let table = ValueTable::from_rows([
            (key, [0.0, 0.0, 2.0]),
            (StateKey::from_state(&next), [1.0, 4.0, -3.0]),
        ]);
        let mut agent = PolicyAgent::new(hp(1)).unwrap().with_table(table);

        agent.store_and_learn(transition(s, Action::Sell, 6.0, next, false));
        let expected = 2.0 + 0.5 * (6.0 + 0.9 * 4.0 - 2.0);
        assert_eq!(agent.table().get(&key).unwrap()[2], expected);
    }

    #[test]
    fn update_inserts_zero_rows_for_both_states() {
        let s = state(100.0, 1.0);
        let next = state(99.0, 0.0);
        let mut agent = PolicyAgent::new(hp(1)).unwrap();
        agent.store_and_learn(transition(s, Action::Sell, -1.0, next, false));

        assert_eq!(agent.table().len(), 2);
        assert_eq!(agent.table().get(&StateKey::from_state(&next)), Some(&[0.0; 3]));
        assert_eq!(agent.table().get(&StateKey::from_state(&s)), Some(&[0.0, 0.0, -0.5]));
    }

    #[test]
    fn epsilon_decays_every_call_down_to_floor() {
        let params = Hyperparameters {
            epsilon: 1.0,
            epsilon_min: 0.5,
            epsilon_decay: 0.5,
            batch_size: 10,
            ..hp(10)
        };
        let mut agent = PolicyAgent::new(params).unwrap();
        let s = state(100.0, 1.0);

        agent.store_and_learn(transition(s, Action::Sell, 1.0, s, false));
        assert_eq!(agent.epsilon(), 0.5);
        agent.store_and_learn(transition(s, Action::Sell, 1.0, s, false));
        assert_eq!(agent.epsilon(), 0.5);
    }

    #[test]
    fn invalid_hyperparameters_are_rejected() {
        let bad = [
            Hyperparameters { alpha: 0.0, ..Hyperparameters::default() },
            Hyperparameters { gamma: 1.5, ..Hyperparameters::default() },
            Hyperparameters { epsilon_decay: 0.0, ..Hyperparameters::default() },
            Hyperparameters { batch_size: 0, ..Hyperparameters::default() },
            Hyperparameters { batch_size: 2000, ..Hyperparameters::default() },
        ];
        for params in bad {
            assert!(matches!(PolicyAgent::new(params), Err(Error::Config(_))));
        }
    }

    #[test]
    fn save_then_load_restores_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock(chrono::Utc::now()));
        let store = TableStore::new(dir.path().join("q.json"), clock);

        let s = state(100.0, 1.0);
        let mut agent = PolicyAgent::new(hp(1)).unwrap().with_store(store.clone());
        agent.store_and_learn(transition(s, Action::Sell, 3.0, s, false));
        agent.save(true).unwrap();

        let mut restored = PolicyAgent::new(hp(1)).unwrap().with_store(store);
        assert!(!restored.load(false), "only a versioned snapshot exists");
        assert!(restored.load(true));
        assert_eq!(restored.table(), agent.table());
    }

    #[test]
    fn corrupt_snapshot_means_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        std::fs::write(&path, b"garbage").unwrap();
        let store = TableStore::new(path, Arc::new(FixedClock(chrono::Utc::now())));

        let mut agent = PolicyAgent::new(hp(1))
            .unwrap()
            .with_table(ValueTable::from_rows([(StateKey([0; 7]), [1.0; 3])]))
            .with_store(store);
        assert!(!agent.load(false));
        assert!(agent.table().is_empty());
    }

    #[test]
    fn missing_snapshot_keeps_current_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(
            dir.path().join("q.json"),
            Arc::new(FixedClock(chrono::Utc::now())),
        );

        let mut agent = PolicyAgent::new(hp(1))
            .unwrap()
            .with_table(ValueTable::from_rows([(StateKey([0; 7]), [1.0; 3])]))
            .with_store(store);
        assert!(!agent.load(false));
        assert!(!agent.load(true));
        assert_eq!(agent.table().len(), 1);
        assert_eq!(agent.table().get(&StateKey([0; 7])), Some(&[1.0; 3]));
    }

    #[test]
    fn save_without_store_is_a_persistence_error() {
        let agent = PolicyAgent::new(hp(1)).unwrap();
        assert!(matches!(agent.save(false), Err(Error::Persistence(_))));
    }
}
