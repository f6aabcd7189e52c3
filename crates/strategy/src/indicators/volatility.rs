/// Sample standard deviation (n − 1 denominator) of the last `window`
/// percentage returns.
///
/// Needs `window + 1` closes to form `window` returns. Returns `None` when
/// short, when `window < 2`, or when a zero price makes a return undefined.
pub fn return_volatility(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window + 1 {
        return None;
    }

    let tail = &closes[closes.len() - window - 1..];
    let returns: Vec<f64> = tail.windows(2).map(|w| w[1] / w[0] - 1.0).collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    std.is_finite().then_some(std)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_growth_has_zero_volatility() {
        let closes: Vec<f64> = (0..12).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let v = return_volatility(&closes, 10).unwrap();
        assert!(v.abs() < 1e-12, "got {v}");
    }

    #[test]
    fn two_returns_match_hand_computed_std() {
        let closes = [100.0, 110.0, 99.0];
        let r1 = 0.1;
        let r2 = 99.0 / 110.0 - 1.0;
        let mean = (r1 + r2) / 2.0;
        let expected = (((r1 - mean) * (r1 - mean) + (r2 - mean) * (r2 - mean)) / 1.0f64).sqrt();
        let v = return_volatility(&closes, 2).unwrap();
        assert!((v - expected).abs() < 1e-12);
    }

    #[test]
    fn short_or_degenerate_input_is_none() {
        assert_eq!(return_volatility(&[1.0; 10], 10), None);
        assert_eq!(return_volatility(&[1.0; 10], 1), None);
        assert_eq!(return_volatility(&[0.0, 1.0, 2.0], 2), None);
    }
}
