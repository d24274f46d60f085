//! End-to-end tests of the stage chain against a real on-disk cache

use eegflow_cache::{ArtifactCache, PipelineVersion, QUARANTINE_SUFFIX, Stage};
use eegflow_pipeline::brainvision;
use eegflow_pipeline::{
    EpochParams, EventTable, FilterParams, Outcome, PipelineError, ProcessorOptions, RawLoader,
    StageCounts, Table, TaskExecutor, TaskRequest, Unavailable,
};
use eegflow_signal::{ChannelInfo, TimeSeriesBuffer};
use ndarray::Array2;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tempfile::TempDir;

const SFREQ: f64 = 250.0;

fn synthetic(seconds: f64, n_channels: usize) -> TimeSeriesBuffer {
    let n = (seconds * SFREQ) as usize;
    let data = Array2::from_shape_fn((n_channels, n), |(c, t)| {
        let t = t as f64 / SFREQ;
        let shared = (2.0 * std::f64::consts::PI * 10.0 * t).sin();
        let own = (2.0 * std::f64::consts::PI * (5.0 + c as f64) * t).sin();
        (shared + 0.3 * own) * 1e-5
    });
    let channels = (1..=n_channels).map(|i| ChannelInfo::eeg(format!("E{i}"))).collect();
    TimeSeriesBuffer::new(data, SFREQ, channels).unwrap()
}

/// In-memory recording that counts raw loads
struct FakeLoader {
    raw: TimeSeriesBuffer,
    events: Option<EventTable>,
    raw_loads: AtomicUsize,
}

impl FakeLoader {
    fn new(raw: TimeSeriesBuffer, events: Option<EventTable>) -> Arc<Self> {
        Arc::new(Self {
            raw,
            events,
            raw_loads: AtomicUsize::new(0),
        })
    }

    fn raw_loads(&self) -> usize {
        self.raw_loads.load(Ordering::SeqCst)
    }
}

impl RawLoader for FakeLoader {
    fn load_raw(&self) -> eegflow_pipeline::Result<TimeSeriesBuffer> {
        self.raw_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.raw.clone())
    }

    fn load_events(&self) -> eegflow_pipeline::Result<Option<EventTable>> {
        Ok(self.events.clone())
    }

    fn load_channels(&self) -> eegflow_pipeline::Result<Option<Table>> {
        Ok(None)
    }

    fn load_electrodes(&self) -> eegflow_pipeline::Result<Option<Table>> {
        Ok(None)
    }

    fn load_metadata(&self) -> eegflow_pipeline::Result<Value> {
        Ok(Value::Object(serde_json::Map::new()))
    }
}

fn cache_at(dir: &TempDir) -> Arc<ArtifactCache> {
    Arc::new(ArtifactCache::new(dir.path(), PipelineVersion::default()).unwrap())
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn stage_dir(root: &Path, stage: Stage) -> PathBuf {
    root.join("S1").join("T").join("run-none").join(stage.dir_name())
}

fn scenario_params() -> FilterParams {
    FilterParams {
        l_freq: 4.0,
        h_freq: 30.0,
        notch: Some(60.0),
        resample_fs: 100.0,
        ..FilterParams::default()
    }
}

fn surround_events() -> EventTable {
    let mut tsv = String::from("onset\tduration\tvalue\tbackground\tforeground_contrast\tstimulus_cond\n");
    for (i, (bg, fg, stim)) in [(0, 0.3, 1), (1, 0.6, 2), (0, 0.3, 1), (1, 1.0, 3), (0, 0.0, 2)]
        .iter()
        .enumerate()
    {
        tsv.push_str(&format!("{}\t0\tstim_ON\t{bg}\t{fg}\t{stim}\n", 2.0 + 2.0 * i as f64));
    }
    tsv.push_str("13.0\t0\tbreak cnt\tn/a\tn/a\tn/a\n");
    Table::parse_tsv(&tsv)
}

#[test]
fn scenario_a_first_call_writes_both_stages_second_hits_cleaned() {
    let dir = TempDir::new().unwrap();
    let loader = FakeLoader::new(synthetic(10.0, 4), None);
    let exec = TaskExecutor::new(TaskRequest::new("S1", "T"), loader.clone(), cache_at(&dir));

    let first = exec.filtered(&scenario_params()).unwrap();
    assert_eq!(files_in(&stage_dir(dir.path(), Stage::Prefilter)).len(), 1);
    assert_eq!(files_in(&stage_dir(dir.path(), Stage::Cleaned)).len(), 1);
    assert!((first.sfreq() - 100.0).abs() < 1e-9);

    let second = exec.filtered(&scenario_params()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        exec.processor().counts(),
        StageCounts {
            prefilter: 1,
            clean: 1,
            ..StageCounts::default()
        }
    );
    assert_eq!(loader.raw_loads(), 1);
}

#[test]
fn fresh_executor_reuses_artifacts_without_loading_raw() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    let loader = FakeLoader::new(synthetic(10.0, 4), None);
    TaskExecutor::new(TaskRequest::new("S1", "T"), loader.clone(), cache.clone())
        .filtered(&scenario_params())
        .unwrap();

    let again = TaskExecutor::new(TaskRequest::new("S1", "T"), loader.clone(), cache);
    again.filtered(&scenario_params()).unwrap();
    assert_eq!(again.processor().counts(), StageCounts::default());
    assert_eq!(loader.raw_loads(), 1);
}

#[test]
fn corrupt_cleaned_artifact_is_quarantined_and_rebuilt() {
    let dir = TempDir::new().unwrap();
    let loader = FakeLoader::new(synthetic(10.0, 4), None);
    let exec = TaskExecutor::new(TaskRequest::new("S1", "T"), loader, cache_at(&dir));
    let original = exec.filtered(&scenario_params()).unwrap();

    let cleaned_dir = stage_dir(dir.path(), Stage::Cleaned);
    let artifact = files_in(&cleaned_dir).pop().unwrap();
    fs::write(&artifact, b"definitely not an artifact").unwrap();

    let rebuilt = exec.filtered(&scenario_params()).unwrap();
    assert_eq!(rebuilt, original);
    let counts = exec.processor().counts();
    assert_eq!((counts.prefilter, counts.clean), (1, 2));
    let names: Vec<String> = files_in(&cleaned_dir)
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.ends_with(QUARANTINE_SUFFIX)));
}

#[test]
fn scenario_d_unsupported_task_never_touches_cache() {
    let dir = TempDir::new().unwrap();
    let loader = FakeLoader::new(synthetic(4.0, 2), None);
    let exec = TaskExecutor::new(TaskRequest::new("S1", "nback"), loader.clone(), cache_at(&dir));

    let out = exec.epochs(&EpochParams::default()).unwrap();
    assert_eq!(
        out.unavailable(),
        Some(&Unavailable::UnsupportedTask { task: "nback".into() })
    );
    assert_eq!(out.unavailable().map(Unavailable::as_str), Some("unavailable"));
    assert!(files_in(dir.path()).is_empty());
    assert_eq!(loader.raw_loads(), 0);
}

#[test]
fn epoch_window_change_reuses_cleaned_buffer() {
    let dir = TempDir::new().unwrap();
    let loader = FakeLoader::new(synthetic(14.0, 4), Some(surround_events()));
    let exec = TaskExecutor::new(TaskRequest::new("S1", "surroundSupp"), loader, cache_at(&dir));

    let base = EpochParams {
        tmin: -0.5,
        tmax: 0.5,
        ..EpochParams::default()
    };
    let first = exec.epochs(&base).unwrap().ready().unwrap();
    assert_eq!(first.epochs.len(), 5);
    assert_eq!(first.labels.len(), 5);

    let wider = EpochParams { tmin: -1.0, ..base.clone() };
    exec.epochs(&wider).unwrap().ready().unwrap();
    let counts = exec.processor().counts();
    assert_eq!((counts.prefilter, counts.clean, counts.epochs), (1, 1, 2));

    // Condition selection reuses the cached epochs
    let picked = exec
        .epochs(&base.clone().with_stimulus(Some("bg0_fg0.3_stim1")))
        .unwrap()
        .ready()
        .unwrap();
    assert_eq!(picked.epochs.len(), 2);
    assert_eq!(exec.processor().counts().epochs, 2);

    let evoked = exec
        .evoked(&base.with_stimulus(Some("bg0_fg0.3_stim1")))
        .unwrap()
        .ready()
        .unwrap();
    assert_eq!(evoked.nave(), 2);
    assert_eq!(evoked.comment(), "bg0_fg0.3_stim1");
}

#[test]
fn unwritable_stage_dirs_still_return_computed_results() {
    let dir = TempDir::new().unwrap();
    // A regular file where each stage directory should go makes every save fail
    let run_dir = dir.path().join("S1").join("surroundSupp").join("run-none");
    fs::create_dir_all(&run_dir).unwrap();
    for stage in [Stage::Prefilter, Stage::Cleaned, Stage::Epochs, Stage::Evoked] {
        fs::write(run_dir.join(stage.dir_name()), b"not a directory").unwrap();
    }

    let loader = FakeLoader::new(synthetic(14.0, 4), Some(surround_events()));
    let exec = TaskExecutor::new(TaskRequest::new("S1", "surroundSupp"), loader, cache_at(&dir));
    let params = EpochParams {
        tmin: -0.5,
        tmax: 0.5,
        ..EpochParams::default()
    };

    let filtered = exec.filtered(&params.filter).unwrap();
    assert!((filtered.sfreq() - 100.0).abs() < 1e-9);

    let Outcome::Ready(epochs) = exec.epochs(&params).unwrap() else {
        panic!("epochs should be computed in memory");
    };
    assert_eq!(epochs.epochs.len(), 5);

    let Outcome::Ready(evoked) = exec.evoked(&params).unwrap() else {
        panic!("evoked should be computed in memory");
    };
    assert_eq!(evoked.nave(), 5);

    for stage in [Stage::Prefilter, Stage::Cleaned, Stage::Epochs, Stage::Evoked] {
        assert!(run_dir.join(stage.dir_name()).is_file());
    }
}

#[test]
fn absent_condition_and_missing_events_are_values() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    let with_events = TaskExecutor::new(
        TaskRequest::new("S1", "surroundSupp"),
        FakeLoader::new(synthetic(14.0, 2), Some(surround_events())),
        cache.clone(),
    );
    let params = EpochParams {
        tmin: -0.5,
        tmax: 0.5,
        ..EpochParams::default()
    };
    let absent = with_events
        .evoked(&params.clone().with_stimulus(Some("bg1_fg0.0_stim1")))
        .unwrap();
    assert!(matches!(absent, Outcome::Unavailable(Unavailable::ConditionAbsent { .. })));

    let without_events = TaskExecutor::new(
        TaskRequest::new("S2", "surroundSupp"),
        FakeLoader::new(synthetic(14.0, 2), None),
        cache,
    );
    let out = without_events.epochs(&params).unwrap();
    assert_eq!(out.unavailable(), Some(&Unavailable::NoEvents));
}

#[test]
fn cancellation_stops_at_next_stage_boundary() {
    let dir = TempDir::new().unwrap();
    let options = ProcessorOptions::default();
    let exec = TaskExecutor::with_options(
        TaskRequest::new("S1", "surroundSupp"),
        FakeLoader::new(synthetic(14.0, 2), Some(surround_events())),
        cache_at(&dir),
        options.clone(),
    );
    let params = EpochParams {
        tmin: -0.5,
        tmax: 0.5,
        ..EpochParams::default()
    };
    exec.filtered(&params.filter).unwrap();

    options.cancel.cancel();
    let err = exec.epochs(&params).unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { stage: "epochs" }));
    assert!(files_in(&dir.path().join("S1/surroundSupp/run-none/epochs")).is_empty());
}

#[test]
fn concurrent_identical_requests_compute_once() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    let loader = FakeLoader::new(synthetic(20.0, 8), None);
    let options = ProcessorOptions::default();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let exec = TaskExecutor::with_options(
                TaskRequest::new("S1", "T"),
                loader.clone(),
                cache.clone(),
                options.clone(),
            );
            thread::spawn(move || {
                exec.filtered(&scenario_params()).unwrap();
                exec.processor().counts()
            })
        })
        .collect();
    let counts: Vec<StageCounts> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(counts.iter().map(|c| c.clean).sum::<usize>(), 1);
    assert_eq!(counts.iter().map(|c| c.prefilter).sum::<usize>(), 1);
    assert_eq!(loader.raw_loads(), 1);
    assert_eq!(options.flights.in_flight(), 0);
}

#[test]
fn bids_dataset_round_trip() {
    let data_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let eeg = data_dir.path().join("sub-01").join("eeg");
    fs::create_dir_all(&eeg).unwrap();
    let prefix = "sub-01_task-surroundSupp_run-1";

    let base = synthetic(14.0, 4);
    let raw = TimeSeriesBuffer::new(
        base.data().clone(),
        SFREQ,
        ["E1", "E2", "E3", "Cz"].iter().map(|n| ChannelInfo::eeg(*n)).collect(),
    )
    .unwrap();
    brainvision::write(&raw, &eeg.join(format!("{prefix}_eeg.vhdr"))).unwrap();

    let mut events = String::from("onset\tduration\tvalue\tbackground\tforeground_contrast\tstimulus_cond\n");
    for i in 0..5 {
        events.push_str(&format!("{}\t0\tstim_ON\t1\t0.6\t{}\n", 2.0 + 2.0 * f64::from(i), 1 + i % 3));
    }
    fs::write(eeg.join(format!("{prefix}_events.tsv")), events).unwrap();
    fs::write(
        eeg.join(format!("{prefix}_channels.tsv")),
        "name\ttype\tstatus\nE1\tEEG\tgood\nE2\tEEG\tbad\nE3\tMISC\tgood\nCz\tEEG\tgood\n",
    )
    .unwrap();
    fs::write(
        eeg.join(format!("{prefix}_electrodes.tsv")),
        "name\tx\ty\tz\nE1\t0.07\t0.0\t0.0\nE2\t0.0\t0.07\t0.0\nE3\t-0.07\t0.0\t0.0\n",
    )
    .unwrap();
    fs::write(eeg.join(format!("{prefix}_eeg.json")), r#"{"PowerLineFrequency": 60}"#).unwrap();

    let request = TaskRequest::new("sub-01", "surroundSupp").with_run("1");
    let exec = TaskExecutor::bids(data_dir.path(), request, cache_at(&cache_dir), ProcessorOptions::default());

    let loaded = exec.raw().unwrap();
    assert_eq!(loaded.channel_names(), vec!["E1", "E2", "E3"]);
    assert!(loaded.is_bad("E2"));
    assert!(loaded.channels()[0].position.is_some());
    assert_eq!(loaded.annotations().len(), 5);
    assert_eq!(exec.metadata().unwrap()["PowerLineFrequency"], 60);
    assert_eq!(exec.channels().unwrap().map(|t| t.len()), Some(4));

    let params = EpochParams {
        tmin: -0.5,
        tmax: 0.5,
        ..EpochParams::default()
    };
    let epochs = exec.epochs(&params).unwrap().ready().unwrap();
    assert_eq!(epochs.epochs.len(), 5);
    assert!(epochs.epochs.bads().is_empty());
    assert_eq!(epochs.labels[0], "bg1_fg0.6_stim1");
}
