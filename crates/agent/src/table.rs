use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use strategy::StateVector;

/// Trading action chosen by the policy. The discriminant is the fixed
/// column index in the value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Hold = 0,
    Buy = 1,
    Sell = 2,
}

impl Action {
    pub const COUNT: usize = 3;
    pub const ALL: [Action; Self::COUNT] = [Action::Hold, Action::Buy, Action::Sell];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_trade(self) -> bool {
        matches!(self, Action::Buy | Action::Sell)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Hold => write!(f, "hold"),
            Action::Buy => write!(f, "buy"),
            Action::Sell => write!(f, "sell"),
        }
    }
}

/// Discretized `StateVector` used as the value-table index.
///
/// Each component is rounded to 2 decimal places (half to even) and stored
/// as the integer number of hundredths, so keys hash identically on every
/// platform. States within 0.005 of each other in every component share a
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey(pub [i64; StateVector::LEN]);

impl StateKey {
    pub const SCALE: f64 = 100.0;

    pub fn from_state(state: &StateVector) -> Self {
        let components = state.to_array();
        let mut key = [0i64; StateVector::LEN];
        for (slot, value) in key.iter_mut().zip(components) {
            *slot = (value * Self::SCALE).round_ties_even() as i64;
        }
        Self(key)
    }

    /// The rounded components as floats.
    pub fn to_rounded(&self) -> [f64; StateVector::LEN] {
        self.0.map(|v| v as f64 / Self::SCALE)
    }
}

pub type Row = [f64; Action::COUNT];

/// Estimated return per action, keyed by discretized state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueTable {
    rows: HashMap<StateKey, Row>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from existing rows (snapshot load, warm start).
    pub fn from_rows(rows: impl IntoIterator<Item = (StateKey, Row)>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &StateKey) -> Option<&Row> {
        self.rows.get(key)
    }

    /// The row for `key`, inserting zeros on first reference.
    pub(crate) fn row_mut(&mut self, key: StateKey) -> &mut Row {
        self.rows.entry(key).or_insert([0.0; Action::COUNT])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Row)> {
        self.rows.iter()
    }
}

/// Action with the highest value; ties go to the lowest index.
pub fn best_action(row: &Row) -> Action {
    let mut best = 0;
    for (i, value) in row.iter().enumerate().skip(1) {
        if *value > row[best] {
            best = i;
        }
    }
    Action::ALL[best]
}

pub fn max_value(row: &Row) -> f64 {
    row.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}
