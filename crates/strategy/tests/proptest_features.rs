use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::Bar;
use strategy::{FeatureConfig, FeatureExtractor};

proptest! {
    /// Any history long enough to be ready yields an all-finite state.
    #[test]
    fn extracted_state_is_always_finite(
        closes in prop::collection::vec(0.0f64..1_000_000.0f64, 20..80),
        start_secs in 0i64..2_000_000_000i64,
    ) {
        let extractor = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let start = Utc.timestamp_opt(start_secs, 0).unwrap();
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::flat(start + chrono::Duration::minutes(i as i64), c, 1.0))
            .collect();

        let state = extractor.extract(&bars).expect("history is long enough");
        prop_assert!(state.is_finite(), "non-finite state: {:?}", state);
        prop_assert!((0.0..=100.0).contains(&state.rsi));
        prop_assert!((0.0..24.0).contains(&state.time_of_day));
    }

    /// Histories shorter than the long window are never ready.
    #[test]
    fn short_history_never_ready(len in 0usize..20) {
        let extractor = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let now = Utc::now();
        let bars: Vec<Bar> = (0..len).map(|_| Bar::flat(now, 100.0, 1.0)).collect();
        prop_assert!(extractor.extract(&bars).is_none());
    }
}
