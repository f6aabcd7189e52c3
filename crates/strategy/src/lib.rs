pub mod features;
pub mod indicators;
pub mod signal;
pub mod strategies;

pub use features::{FeatureConfig, FeatureExtractor, StateVector};
pub use signal::{RawSignal, Signal, SignalSide};
pub use strategies::{ExternalSignalStrategy, SmaCrossStrategy};

use common::Bar;

/// Capability interface for signal-producing strategies.
///
/// Implementations are explicit variants; nothing inherits behaviour.
pub trait Strategy: Send + Sync {
    /// Stable identifier used in logs and as the signal `source`.
    fn name(&self) -> &str;

    /// Inspect the latest bars (oldest first) and optionally emit a signal.
    fn analyze(&self, bars: &[Bar]) -> Option<Signal>;

    /// Decide whether a signal (own or external) is acceptable to act on.
    fn validate_signal(&self, signal: &Signal) -> bool;
}
