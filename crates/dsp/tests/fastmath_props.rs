use dsp::fastmath::{
    approx3_tanh, approx5_exp2, approx7_tanh, approx9_exp2, saturate_branching, saturate_hard,
    signal_from_freq, signal_to_freq,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn exp2_relative_error_holds_across_octaves(x in -60.0f32..60.0) {
        let exact = (x as f64).exp2();
        prop_assert!(((approx5_exp2(x) - exact) / exact).abs() < 1e-5);
        prop_assert!(((approx9_exp2(x) - exact) / exact).abs() < 1e-7);
    }

    #[test]
    fn exp2_has_no_step_at_octave_seams(k in -30i32..30) {
        // the integer part flips at k + 0.5
        let below = approx5_exp2(k as f32 + 0.499_99);
        let above = approx5_exp2(k as f32 + 0.500_01);
        prop_assert!((above / below - 1.0).abs() < 5e-5);
    }

    #[test]
    fn saturation_is_a_clamp(value in -1e3f64..1e3, limit in 1e-3f64..1e2) {
        let clamped = value.clamp(-limit, limit);
        let error = (saturate_hard(value, limit) - clamped).abs();
        prop_assert!(error <= 1e-9 * (value.abs() + limit));
        prop_assert_eq!(saturate_branching(value, limit), clamped);
    }

    #[test]
    fn tanh_is_bounded_and_tracks_exact(x in -40.0f32..40.0) {
        prop_assert!((-1.0..=1.0).contains(&approx3_tanh(x)));
        prop_assert!((approx7_tanh(x) - (x as f64).tanh()).abs() < 1e-6);
    }

    #[test]
    fn frequency_signal_round_trips(freq in 0.0f64..24_000.0) {
        prop_assert!((signal_to_freq(signal_from_freq(freq)) - freq).abs() < 1e-9);
    }
}
