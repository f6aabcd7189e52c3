/// RSI (Relative Strength Index) indicator.
///
/// Uses a simple rolling mean of gains and losses over the last `period`
/// price changes (no Wilder smoothing), mapped to `100 - 100 / (1 + RS)`.
/// Returns `None` until at least `period + 1` closed price values are available.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    /// Value reported when RSI cannot be computed.
    pub const NEUTRAL: f64 = 50.0;

    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "RSI period must be >= 1");
        Self { period }
    }

    /// Compute RSI from a slice of close prices (oldest first).
    /// Returns `None` if there are fewer than `period + 1` values.
    ///
    /// A window with no losses reports 100, including the flat case with no
    /// gains either.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        let window = &closes[closes.len() - self.period - 1..];
        let changes = window.windows(2).map(|w| w[1] - w[0]);

        let (gains, losses) = changes.fold((0.0, 0.0), |(g, l), change| {
            if change > 0.0 {
                (g + change, l)
            } else {
                (g, l - change)
            }
        });
        let avg_gain = gains / self.period as f64;
        let avg_loss = losses / self.period as f64;

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        let value = 100.0 - 100.0 / (1.0 + rs);
        value.is_finite().then_some(value)
    }

    /// Like `compute`, substituting the neutral 50 when RSI is undefined.
    pub fn compute_or_neutral(&self, closes: &[f64]) -> f64 {
        self.compute(closes).unwrap_or(Self::NEUTRAL)
    }
}
