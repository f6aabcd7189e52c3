use serde::{Deserialize, Serialize};

use common::Error;

/// Direction requested by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Buy,
    Sell,
}

/// Inbound signal exactly as received (webhook body, alert payload).
/// Nothing is trusted until it is converted into a `Signal`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSignal {
    pub symbol: Option<String>,
    pub action: Option<String>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
}

/// A validated trading signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub side: SignalSide,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub source: String,
}

impl TryFrom<RawSignal> for Signal {
    type Error = Error;

    fn try_from(raw: RawSignal) -> Result<Self, Self::Error> {
        let symbol = raw
            .symbol
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidSignal("missing symbol".into()))?;

        let side = match raw.action.as_deref().map(|a| a.trim().to_lowercase()) {
            Some(a) if a == "buy" => SignalSide::Buy,
            Some(a) if a == "sell" => SignalSide::Sell,
            Some(other) => return Err(Error::InvalidSignal(format!("unknown action '{other}'"))),
            None => return Err(Error::InvalidSignal("missing action".into())),
        };

        let confidence = raw
            .confidence
            .ok_or_else(|| Error::InvalidSignal("missing confidence".into()))?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidSignal(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        Ok(Signal {
            symbol,
            side,
            confidence,
            source: raw.source.unwrap_or_else(|| "external".to_string()),
        })
    }
}
