pub mod ledger;

pub use ledger::{
    position_size, ClosedTrade, CloseReason, ExitTrigger, PositionLedger, RiskConfig,
};
