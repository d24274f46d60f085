//! Property-based tests for stage facets
//!
//! - Downstream fields never reach upstream hashes
//! - Upstream fields reach every downstream hash

use eegflow_cache::params_hash;
use eegflow_pipeline::{EpochParams, FilterParams};
use proptest::prelude::*;

fn filter_strategy() -> impl Strategy<Value = FilterParams> {
    (
        0.1f64..10.0,
        20.0f64..45.0,
        prop::option::of(prop_oneof![Just(50.0), Just(60.0)]),
        prop_oneof![Just(100.0), Just(128.0), Just(250.0)],
        prop::option::of(0.3f64..0.9),
    )
        .prop_map(|(l_freq, h_freq, notch, resample_fs, clean_corr_min)| FilterParams {
            l_freq,
            h_freq,
            notch,
            resample_fs,
            clean_corr_min,
            ..FilterParams::default()
        })
}

/// Fields that only shape views downstream of the cleaned buffer
fn view_strategy() -> impl Strategy<Value = (f64, f64, Option<String>, String, bool, Option<f64>)> {
    (
        -3.0f64..0.0,
        0.0f64..2.0,
        prop::option::of("bg[01]_fg0\\.[036]_stim[123]"),
        "[0-9]{1,3}(-[0-9]{1,3})?",
        any::<bool>(),
        prop::option::of(-200.0f64..200.0),
    )
}

fn epochs_with(filter: FilterParams, view: (f64, f64, Option<String>, String, bool, Option<f64>)) -> EpochParams {
    let (tmin, tmax, stimulus, channels, show_bad, uv_min) = view;
    EpochParams {
        filter: FilterParams {
            channels,
            show_bad,
            uv_min,
            ..filter
        },
        tmin,
        tmax,
        stimulus,
    }
}

proptest! {
    /// Window, condition and display fields leave the prefilter and cleaning hashes alone
    #[test]
    fn view_fields_do_not_reach_upstream(filter in filter_strategy(), a in view_strategy(), b in view_strategy()) {
        let left = epochs_with(filter.clone(), a);
        let right = epochs_with(filter, b);
        prop_assert_eq!(
            params_hash(&left.filter.filter_facet()).unwrap(),
            params_hash(&right.filter.filter_facet()).unwrap()
        );
        prop_assert_eq!(
            params_hash(&left.filter.cleaning_facet()).unwrap(),
            params_hash(&right.filter.cleaning_facet()).unwrap()
        );
    }

    /// Condition selection reuses the epochs artifact
    #[test]
    fn stimulus_only_reaches_evoked(filter in filter_strategy(), view in view_strategy(), other in prop::option::of("bg1_fg1\\.0_stim[123]")) {
        let base = epochs_with(filter, view);
        let picked = base.clone().with_stimulus(other.as_deref());
        prop_assert_eq!(
            params_hash(&base.epoch_facet()).unwrap(),
            params_hash(&picked.epoch_facet()).unwrap()
        );
        if base.stimulus != picked.stimulus {
            prop_assert_ne!(
                params_hash(&base.evoked_facet()).unwrap(),
                params_hash(&picked.evoked_facet()).unwrap()
            );
        }
    }

    /// A different highpass edge invalidates every stage
    #[test]
    fn l_freq_reaches_every_stage(filter in filter_strategy(), view in view_strategy(), delta in 0.05f64..5.0) {
        let base = epochs_with(filter.clone(), view.clone());
        let moved = epochs_with(FilterParams { l_freq: filter.l_freq + delta, ..filter }, view);
        prop_assert_ne!(
            params_hash(&base.filter.filter_facet()).unwrap(),
            params_hash(&moved.filter.filter_facet()).unwrap()
        );
        prop_assert_ne!(
            params_hash(&base.filter.cleaning_facet()).unwrap(),
            params_hash(&moved.filter.cleaning_facet()).unwrap()
        );
        prop_assert_ne!(
            params_hash(&base.epoch_facet()).unwrap(),
            params_hash(&moved.epoch_facet()).unwrap()
        );
        prop_assert_ne!(
            params_hash(&base.evoked_facet()).unwrap(),
            params_hash(&moved.evoked_facet()).unwrap()
        );
    }

    /// Cleaning thresholds leave the prefilter hash alone but reach the cleaning hash
    #[test]
    fn cleaning_fields_stop_at_prefilter(filter in filter_strategy(), max_std in 5.0f64..40.0) {
        let tuned = FilterParams { clean_asr_max_std: Some(max_std), ..filter.clone() };
        prop_assert_eq!(
            params_hash(&filter.filter_facet()).unwrap(),
            params_hash(&tuned.filter_facet()).unwrap()
        );
        prop_assert_ne!(
            params_hash(&filter.cleaning_facet()).unwrap(),
            params_hash(&tuned.cleaning_facet()).unwrap()
        );
    }
}
