//! Tabular Q-learning policy: discretized state keys, a value table,
//! experience replay and snapshot persistence.

pub mod policy;
pub mod replay;
pub mod snapshot;
pub mod table;

pub use policy::{Hyperparameters, PolicyAgent};
pub use replay::{ReplayBuffer, Transition};
pub use snapshot::{TableLock, TableStore};
pub use table::{Action, StateKey, ValueTable};
