//! Stage orchestration for one recording
//!
//! ```text
//! RAW ──prefilter──▶ PREFILTERED ──clean_mark──▶ CLEANED ──strategy──▶ EPOCHED ──average──▶ AVERAGED
//!                    (filter facet)              (cleaning facet)      (epoch facet)        (evoked facet)
//! ```
//!
//! Every stage keys off its own facet, so changing an epoch window reuses the
//! cleaned buffer and changing the condition reuses the epochs.

use crate::flight::SingleFlight;
use crate::loader::{EventTable, TaskRequest};
use crate::outcome::{Outcome, Unavailable};
use crate::params::{EpochParams, FilterParams};
use crate::strategy::{EpochStrategy, LabeledEpochs, StrategyRegistry, Window};
use crate::{PipelineError, Result};
use eegflow_cache::{ArtifactCache, CacheKey, Stage};
use eegflow_signal::{ALL_CONDITIONS, AveragedResponse, EpochCollection, SignalCleaner, TimeSeriesBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Baseline applied when no single condition is requested
const PRE_EVENT_BASELINE: eegflow_signal::Baseline = (None, Some(0.0));

/// Accessors the processor pulls its inputs from
pub trait TaskInputs: Send + Sync {
    /// Raw recording
    fn raw(&self) -> Result<TimeSeriesBuffer>;

    /// Event table, if the recording has one
    fn events(&self) -> Result<Option<EventTable>>;
}

/// Shared collaborators of every processor in a process
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Epoch strategies by task
    pub strategies: Arc<StrategyRegistry>,
    /// Keyed guard against duplicate computations
    pub flights: Arc<SingleFlight>,
    /// Checked between stages
    pub cancel: CancellationToken,
}

/// How many times each stage was computed rather than loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    /// Prefilter passes
    pub prefilter: usize,
    /// Cleaning passes
    pub clean: usize,
    /// Epoch extractions
    pub epochs: usize,
    /// Averages
    pub evoked: usize,
}

#[derive(Debug, Default)]
struct StageCounters {
    prefilter: AtomicUsize,
    clean: AtomicUsize,
    epochs: AtomicUsize,
    evoked: AtomicUsize,
}

impl StageCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StageCounts {
        StageCounts {
            prefilter: self.prefilter.load(Ordering::Relaxed),
            clean: self.clean.load(Ordering::Relaxed),
            epochs: self.epochs.load(Ordering::Relaxed),
            evoked: self.evoked.load(Ordering::Relaxed),
        }
    }
}

/// Runs the stage chain for one recording against an artifact cache
pub struct TaskProcessor {
    request: TaskRequest,
    cache: Arc<ArtifactCache>,
    inputs: Arc<dyn TaskInputs>,
    options: ProcessorOptions,
    counters: StageCounters,
}

impl std::fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("request", &self.request)
            .field("cache", &self.cache.root())
            .field("counts", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl TaskProcessor {
    /// Processor with default strategies, its own flight table and no cancellation
    #[must_use]
    pub fn new(request: TaskRequest, cache: Arc<ArtifactCache>, inputs: Arc<dyn TaskInputs>) -> Self {
        Self::with_options(request, cache, inputs, ProcessorOptions::default())
    }

    /// Processor sharing `options` with others
    #[must_use]
    pub fn with_options(
        request: TaskRequest,
        cache: Arc<ArtifactCache>,
        inputs: Arc<dyn TaskInputs>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            request,
            cache,
            inputs,
            options,
            counters: StageCounters::default(),
        }
    }

    /// The recording this processor serves
    #[must_use]
    pub fn request(&self) -> &TaskRequest {
        &self.request
    }

    /// Computation counts so far
    #[must_use]
    pub fn counts(&self) -> StageCounts {
        self.counters.snapshot()
    }

    fn key<P: serde::Serialize>(&self, stage: Stage, facet: &P) -> Result<CacheKey> {
        Ok(self.cache.key(
            &self.request.subject,
            &self.request.task,
            self.request.run.as_deref(),
            stage,
            facet,
        )?)
    }

    fn checkpoint(&self, stage: &'static str) -> Result<()> {
        if self.options.cancel.is_cancelled() {
            tracing::info!(stage, "[processor] cancelled");
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }

    fn strategy(&self) -> std::result::Result<Arc<dyn EpochStrategy>, Unavailable> {
        self.options.strategies.resolve(&self.request.task).ok_or_else(|| {
            tracing::warn!(task = %self.request.task, "[processor] unsupported task");
            Unavailable::UnsupportedTask {
                task: self.request.task.clone(),
            }
        })
    }

    /// Cleaned buffer for `params`
    ///
    /// CLEANED hit returns directly. Otherwise the PREFILTERED artifact is
    /// loaded or built from raw (and reloaded from its persisted form), the
    /// detectors run, and the result is saved as CLEANED.
    #[tracing::instrument(
        name = "get_filtered",
        skip_all,
        fields(subject = %self.request.subject, task = %self.request.task, run = ?self.request.run)
    )]
    pub fn get_filtered(&self, params: &FilterParams) -> Result<TimeSeriesBuffer> {
        let cleaned_key = self.key(Stage::Cleaned, &params.cleaning_facet())?;
        if let Some(cleaned) = self.cache.load::<TimeSeriesBuffer>(&cleaned_key) {
            return Ok(cleaned);
        }
        let _flight = self.options.flights.acquire(&cleaned_key.identity());
        if let Some(cleaned) = self.cache.load::<TimeSeriesBuffer>(&cleaned_key) {
            tracing::debug!("[processor] cleaned buffer produced by a concurrent request");
            return Ok(cleaned);
        }

        self.checkpoint("prefilter")?;
        let prefiltered = self.prefiltered(params)?;

        self.checkpoint("clean")?;
        StageCounters::bump(&self.counters.clean);
        let cleaned = SignalCleaner::clean_mark(prefiltered, &params.cleaning_settings())?;
        self.cache.save(&cleaned, &cleaned_key);
        Ok(cleaned)
    }

    fn prefiltered(&self, params: &FilterParams) -> Result<TimeSeriesBuffer> {
        let key = self.key(Stage::Prefilter, &params.filter_facet())?;
        if let Some(buffer) = self.cache.load::<TimeSeriesBuffer>(&key) {
            return Ok(buffer);
        }
        let _flight = self.options.flights.acquire(&key.identity());
        if let Some(buffer) = self.cache.load::<TimeSeriesBuffer>(&key) {
            return Ok(buffer);
        }

        StageCounters::bump(&self.counters.prefilter);
        let buffer = SignalCleaner::prefilter(self.inputs.raw()?, &params.filter_settings())?;
        Ok(self
            .cache
            .save(&buffer, &key)
            .and_then(|_| self.cache.load::<TimeSeriesBuffer>(&key))
            .unwrap_or(buffer))
    }

    fn load_epochs(&self, key: &CacheKey) -> Option<LabeledEpochs> {
        self.cache
            .load_labeled::<EpochCollection>(key)
            .map(|(epochs, labels)| LabeledEpochs {
                labels: labels.unwrap_or_else(|| epochs.labels()),
                epochs,
            })
    }

    /// Epochs for `params`, narrowed to `params.stimulus` when set and baseline-corrected otherwise
    #[tracing::instrument(
        name = "get_epochs",
        skip_all,
        fields(subject = %self.request.subject, task = %self.request.task, run = ?self.request.run)
    )]
    pub fn get_epochs(&self, params: &EpochParams) -> Result<Outcome<LabeledEpochs>> {
        let strategy = match self.strategy() {
            Ok(strategy) => strategy,
            Err(reason) => return Ok(reason.into()),
        };
        let key = self.key(Stage::Epochs, &params.epoch_facet())?;

        let labeled = if let Some(labeled) = self.load_epochs(&key) {
            labeled
        } else {
            let _flight = self.options.flights.acquire(&key.identity());
            match self.load_epochs(&key) {
                Some(labeled) => labeled,
                None => match self.build_epochs(strategy.as_ref(), params, &key)? {
                    Outcome::Ready(labeled) => labeled,
                    Outcome::Unavailable(reason) => {
                        tracing::info!(%reason, "[processor] epochs unavailable");
                        return Ok(reason.into());
                    }
                },
            }
        };
        Ok(Self::narrow(labeled, params.stimulus.as_deref()))
    }

    fn build_epochs(
        &self,
        strategy: &dyn EpochStrategy,
        params: &EpochParams,
        key: &CacheKey,
    ) -> Result<Outcome<LabeledEpochs>> {
        let filtered = self.get_filtered(&params.filter)?;
        self.checkpoint("epochs")?;
        let events = self.inputs.events()?;

        StageCounters::bump(&self.counters.epochs);
        let window = Window {
            tmin: params.tmin,
            tmax: params.tmax,
        };
        let LabeledEpochs { epochs, labels } = match strategy.extract(filtered, events.as_ref(), window)? {
            Outcome::Ready(labeled) => labeled,
            unavailable @ Outcome::Unavailable(_) => return Ok(unavailable),
        };
        let epochs = if epochs.bads().is_empty() {
            epochs
        } else {
            epochs.interpolate_bads(true)?
        };
        tracing::info!(strategy = strategy.name(), n_epochs = epochs.len(), "[processor] epochs built");
        self.cache.save_labeled(&epochs, key, Some(&labels));
        Ok(Outcome::Ready(LabeledEpochs { epochs, labels }))
    }

    fn narrow(labeled: LabeledEpochs, stimulus: Option<&str>) -> Outcome<LabeledEpochs> {
        let LabeledEpochs { epochs, labels } = labeled;
        let Some(condition) = stimulus else {
            return Outcome::Ready(LabeledEpochs {
                epochs: epochs.apply_baseline(PRE_EVENT_BASELINE),
                labels,
            });
        };
        match epochs.select(condition) {
            Some(epochs) if !epochs.is_empty() => Outcome::Ready(LabeledEpochs { epochs, labels }),
            Some(_) => Unavailable::EmptyEpochs.into(),
            None => Unavailable::ConditionAbsent {
                condition: condition.to_string(),
            }
            .into(),
        }
    }

    /// Trial average for `params`, over `params.stimulus` or every condition
    #[tracing::instrument(
        name = "get_evoked",
        skip_all,
        fields(subject = %self.request.subject, task = %self.request.task, run = ?self.request.run)
    )]
    pub fn get_evoked(&self, params: &EpochParams) -> Result<Outcome<AveragedResponse>> {
        if let Err(reason) = self.strategy() {
            return Ok(reason.into());
        }
        let key = self.key(Stage::Evoked, &params.evoked_facet())?;
        if let Some(evoked) = self.cache.load::<AveragedResponse>(&key) {
            return Ok(Outcome::Ready(evoked));
        }
        let _flight = self.options.flights.acquire(&key.identity());
        if let Some(evoked) = self.cache.load::<AveragedResponse>(&key) {
            return Ok(Outcome::Ready(evoked));
        }

        let epochs = match self.get_epochs(params)? {
            Outcome::Ready(labeled) => labeled.epochs,
            Outcome::Unavailable(reason) => return Ok(reason.into()),
        };
        self.checkpoint("average")?;
        StageCounters::bump(&self.counters.evoked);
        let epochs = if epochs.bads().is_empty() {
            epochs
        } else {
            epochs.interpolate_bads(true)?
        };
        let evoked = epochs.average(params.stimulus.as_deref().unwrap_or(ALL_CONDITIONS))?;
        tracing::info!(nave = evoked.nave(), comment = evoked.comment(), "[processor] evoked computed");
        self.cache.save(&evoked, &key);
        Ok(Outcome::Ready(evoked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eegflow_cache::PipelineVersion;
    use eegflow_signal::{Annotation, ChannelInfo};
    use ndarray::Array2;
    use tempfile::TempDir;

    struct Synthetic {
        raw: TimeSeriesBuffer,
    }

    impl TaskInputs for Synthetic {
        fn raw(&self) -> Result<TimeSeriesBuffer> {
            Ok(self.raw.clone())
        }

        fn events(&self) -> Result<Option<EventTable>> {
            Ok(None)
        }
    }

    fn processor(dir: &TempDir, task: &str) -> TaskProcessor {
        let data = Array2::from_shape_fn((3, 2000), |(c, t)| {
            let t = t as f64 / 200.0;
            ((c + 1) as f64 * 7.0 * t).sin() * 1e-5
        });
        let channels = (1..=3).map(|i| ChannelInfo::eeg(format!("E{i}"))).collect();
        let mut raw = TimeSeriesBuffer::new(data, 200.0, channels).unwrap();
        raw.annotate((1..9).map(|s| Annotation::new(f64::from(s), 0.0, "contrastTrial_start")));
        let cache = ArtifactCache::new(dir.path(), PipelineVersion::default()).unwrap();
        TaskProcessor::new(
            TaskRequest::new("S1", task),
            Arc::new(cache),
            Arc::new(Synthetic { raw }),
        )
    }

    fn epoch_params() -> EpochParams {
        EpochParams {
            tmin: -0.2,
            tmax: 0.3,
            ..EpochParams::default()
        }
    }

    #[test]
    fn test_filtered_hits_cleaned_second_time() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir, "contrastChangeDetection");
        let params = FilterParams::default();
        let first = p.get_filtered(&params).unwrap();
        let second = p.get_filtered(&params).unwrap();
        assert_eq!(first, second);
        assert_eq!(p.counts(), StageCounts { prefilter: 1, clean: 1, ..StageCounts::default() });
    }

    #[test]
    fn test_cleaning_change_reuses_prefilter() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir, "contrastChangeDetection");
        p.get_filtered(&FilterParams::default()).unwrap();
        let params = FilterParams {
            clean_flatline_sec: Some(2.0),
            ..FilterParams::default()
        };
        p.get_filtered(&params).unwrap();
        assert_eq!(p.counts().prefilter, 1);
        assert_eq!(p.counts().clean, 2);
    }

    #[test]
    fn test_epochs_and_condition_selection() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir, "contrastChangeDetection");
        let all = p.get_epochs(&epoch_params()).unwrap().ready().unwrap();
        assert_eq!(all.epochs.len(), 8);
        assert!(all.epochs.baseline().is_some());

        let picked = p
            .get_epochs(&epoch_params().with_stimulus(Some("trial_start")))
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(picked.epochs.len(), 8);
        assert!(picked.epochs.baseline().is_none());
        assert_eq!(p.counts().epochs, 1);

        let absent = p.get_epochs(&epoch_params().with_stimulus(Some("open"))).unwrap();
        assert_eq!(
            absent.unavailable(),
            Some(&Unavailable::ConditionAbsent { condition: "open".into() })
        );
    }

    #[test]
    fn test_evoked_cached() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir, "contrastChangeDetection_run-1");
        let evoked = p.get_evoked(&epoch_params()).unwrap().ready().unwrap();
        assert_eq!(evoked.nave(), 8);
        assert_eq!(evoked.comment(), ALL_CONDITIONS);
        let again = p.get_evoked(&epoch_params()).unwrap().ready().unwrap();
        assert_eq!(evoked, again);
        assert_eq!(p.counts().evoked, 1);
    }

    #[test]
    fn test_unsupported_task_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir, "nback");
        let out = p.get_epochs(&epoch_params()).unwrap();
        assert!(matches!(out, Outcome::Unavailable(Unavailable::UnsupportedTask { .. })));
        assert!(!p.get_evoked(&epoch_params()).unwrap().is_ready());
        assert_eq!(p.counts(), StageCounts::default());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_before_prefilter() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir, "contrastChangeDetection");
        p.options.cancel.cancel();
        let err = p.get_filtered(&FilterParams::default()).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(p.counts(), StageCounts::default());
    }
}
