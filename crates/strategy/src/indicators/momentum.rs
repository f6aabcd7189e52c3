/// Price change over `window` bars: `close[-1] - close[-(window + 1)]`.
/// Returns `None` with fewer than `window + 1` closes.
pub fn momentum(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - window];
    let value = last - base;
    value.is_finite().then_some(value)
}
