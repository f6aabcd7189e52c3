/// Arithmetic mean of the last `period` closes.
/// Returns `None` if there are fewer than `period` values or `period` is 0.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_of_trailing_window() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&closes, 2), Some(4.5));
        assert_eq!(sma(&closes, 5), Some(3.0));
    }

    #[test]
    fn sma_none_when_short() {
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0, 2.0], 0), None);
    }
}
