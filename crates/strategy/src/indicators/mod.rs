//! Pure indicator functions over close-price slices (oldest first).
//!
//! Each returns `None` when the input is too short or the result is not a
//! finite number; callers decide on the neutral substitute.

pub mod momentum;
pub mod moving_average;
pub mod rsi;
pub mod volatility;

pub use momentum::momentum;
pub use moving_average::sma;
pub use rsi::RsiIndicator;
pub use volatility::return_volatility;
