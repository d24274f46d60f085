//! Raw buffer through prefilter, marking, epoching and averaging

use eegflow_signal::{
    ChannelInfo, CleaningSettings, EpochCollection, EpochEvent, FilterSettings, SignalCleaner, TimeSeriesBuffer,
};
use ndarray::{Array2, Axis};
use std::collections::BTreeMap;
use std::f64::consts::PI;

const RAW_SFREQ: f64 = 250.0;

/// Three live channels plus one that never moves
fn raw_with_dead_channel(seconds: f64) -> TimeSeriesBuffer {
    let n = (seconds * RAW_SFREQ) as usize;
    let data = Array2::from_shape_fn((4, n), |(c, t)| {
        if c == 3 {
            return 0.0;
        }
        let t = t as f64 / RAW_SFREQ;
        (2.0 * PI * 10.0 * t).sin() * 1e-5 + (2.0 * PI * (6.0 + c as f64) * t).cos() * 5e-6
    });
    let channels = (1..=4).map(|i| ChannelInfo::eeg(format!("E{i}"))).collect();
    TimeSeriesBuffer::new(data, RAW_SFREQ, channels).unwrap()
}

fn prefiltered() -> TimeSeriesBuffer {
    let settings = FilterSettings {
        l_freq: Some(1.0),
        h_freq: Some(40.0),
        notch: Some(60.0),
        resample_fs: Some(100.0),
    };
    SignalCleaner::prefilter(raw_with_dead_channel(10.0), &settings).unwrap()
}

#[test]
fn prefilter_resamples_and_records_passband() {
    let buffer = prefiltered();
    assert!((buffer.sfreq() - 100.0).abs() < 1e-9);
    assert_eq!(buffer.n_samples(), 1000);
    assert!((buffer.highpass() - 1.0).abs() < 1e-9);
    assert!((buffer.lowpass() - 40.0).abs() < 1e-9);
    assert!(buffer.data().row(3).iter().all(|v| v.abs() < 1e-12));
}

#[test]
fn chain_marks_interpolates_and_averages() {
    let cleaning = CleaningSettings {
        flatline_sec: Some(5.0),
        ..CleaningSettings::default()
    };
    let cleaned = SignalCleaner::clean_mark(prefiltered(), &cleaning).unwrap();
    assert!(cleaned.is_bad("E4"));
    assert_eq!(cleaned.bads().len(), 1);

    let events: Vec<EpochEvent> = [200, 400, 600]
        .into_iter()
        .map(|sample| EpochEvent { sample, id: 1 })
        .collect();
    let event_id = BTreeMap::from([("trial".to_string(), 1)]);
    let epochs = EpochCollection::from_events(&cleaned, &events, event_id, -0.2, 0.5).unwrap();
    assert_eq!(epochs.len(), 3);
    assert_eq!(epochs.n_times(), 71);
    assert!(epochs.bads().contains("E4"));

    let epochs = epochs.interpolate_bads(true).unwrap();
    assert!(epochs.bads().is_empty());
    // Without positions the dead channel becomes the mean of the good ones
    let first = epochs.data().index_axis(Axis(0), 0);
    let mean = first.slice(ndarray::s![0..3, ..]).mean_axis(Axis(0)).unwrap();
    for (a, b) in first.row(3).iter().zip(mean.iter()) {
        assert!((a - b).abs() < 1e-15);
    }

    let evoked = epochs.average("trial").unwrap();
    assert_eq!(evoked.nave(), 3);
    assert_eq!(evoked.comment(), "trial");
    assert_eq!(evoked.data().dim(), (4, 71));
}

#[test]
fn windows_past_the_edges_are_dropped() {
    let buffer = prefiltered();
    let events = [EpochEvent { sample: 10, id: 1 }, EpochEvent { sample: 500, id: 1 }, EpochEvent { sample: 990, id: 1 }];
    let event_id = BTreeMap::from([("trial".to_string(), 1)]);
    let epochs = EpochCollection::from_events(&buffer, &events, event_id, -0.5, 0.5).unwrap();
    assert_eq!(epochs.len(), 1);
    assert_eq!(epochs.selection(), &[1]);
}
