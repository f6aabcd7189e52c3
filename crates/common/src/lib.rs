pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::{Clock, ExchangeClient, FixedClock, MarketDataSource, SystemClock};
pub use types::*;
