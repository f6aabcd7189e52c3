use thiserror::Error;

/// Every failure the decision loop knows how to recover from, plus the
/// startup-only `Config` variant.
///
/// All variants except `Config` are absorbed at the tick boundary: they are
/// logged and the loop moves on to the next tick.
#[derive(Debug, Error)]
pub enum Error {
    /// Market data could not be fetched (or the source had nothing yet).
    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    /// An order could not be placed or filled. The ledger is left unchanged.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Reading or writing the value-table snapshot failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The replay buffer holds fewer transitions than were requested.
    #[error("Insufficient samples: requested {requested}, available {available}")]
    InsufficientSamples { requested: usize, available: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the conditions that are expected to clear up on their own
    /// (no data yet, snapshot write failed) rather than indicating a broken
    /// collaborator.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::DataUnavailable(_) | Error::Persistence(_) | Error::InsufficientSamples { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
