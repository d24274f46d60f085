//! Aggregation of one task across many recordings

use crate::Result;
use crate::executor::TaskExecutor;
use crate::loader::{EventTable, Table};
use crate::outcome::{Outcome, Unavailable};
use crate::params::{EpochParams, FilterParams};
use crate::strategy::LabeledEpochs;
use eegflow_signal::{AveragedResponse, EpochCollection, TimeSeriesBuffer};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
struct CohortMemo {
    filtered: HashMap<String, TimeSeriesBuffer>,
    epochs: HashMap<String, LabeledEpochs>,
    evoked: HashMap<String, AveragedResponse>,
    events: Option<EventTable>,
}

/// Runs the same request over every executor and merges the results
///
/// Results are memoized per parameter facet for the executor's lifetime.
pub struct CohortExecutor {
    task: String,
    executors: Vec<TaskExecutor>,
    memo: Mutex<CohortMemo>,
}

impl std::fmt::Debug for CohortExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortExecutor")
            .field("task", &self.task)
            .field("executors", &self.executors.len())
            .finish_non_exhaustive()
    }
}

/// First reason seen, `NoEvents` when nothing was tried
fn first_reason(reasons: Vec<Unavailable>) -> Unavailable {
    reasons.into_iter().next().unwrap_or(Unavailable::NoEvents)
}

impl CohortExecutor {
    /// Cohort over `executors`, all serving `task`
    #[must_use]
    pub fn new(task: impl Into<String>, executors: Vec<TaskExecutor>) -> Self {
        Self {
            task: task.into(),
            executors,
            memo: Mutex::new(CohortMemo::default()),
        }
    }

    /// Task shared by the cohort
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Member executors
    #[must_use]
    pub fn executors(&self) -> &[TaskExecutor] {
        &self.executors
    }

    /// Event tables of every member, stacked
    pub fn events(&self) -> Result<EventTable> {
        if let Some(events) = self.memo.lock().events.clone() {
            return Ok(events);
        }
        let mut tables = Vec::new();
        for executor in &self.executors {
            if let Some(table) = executor.events()? {
                tables.push(table);
            }
        }
        let events = Table::concat(&tables);
        self.memo.lock().events = Some(events.clone());
        Ok(events)
    }

    /// Channel table of the first member
    pub fn channels(&self) -> Result<Option<Table>> {
        self.executors.first().map_or(Ok(None), TaskExecutor::channels)
    }

    /// Electrode table of the first member
    pub fn electrodes(&self) -> Result<Option<Table>> {
        self.executors.first().map_or(Ok(None), TaskExecutor::electrodes)
    }

    /// Metadata of the first member
    pub fn metadata(&self) -> Result<Value> {
        self.executors
            .first()
            .map_or_else(|| Ok(Value::Object(serde_json::Map::new())), TaskExecutor::metadata)
    }

    /// Members' cleaned buffers joined end to end; `None` for an empty cohort
    pub fn filtered(&self, params: &FilterParams) -> Result<Option<TimeSeriesBuffer>> {
        let key = eegflow_cache::canonical_json(&params.cleaning_facet())?;
        if let Some(buffer) = self.memo.lock().filtered.get(&key) {
            return Ok(Some(buffer.clone()));
        }
        let buffers = self
            .executors
            .iter()
            .map(|e| e.filtered(params))
            .collect::<Result<Vec<_>>>()?;
        if buffers.is_empty() {
            return Ok(None);
        }
        let joined = TimeSeriesBuffer::concatenate(buffers)?;
        tracing::info!(
            task = %self.task,
            members = self.executors.len(),
            samples = joined.n_samples(),
            "[cohort] filtered joined"
        );
        self.memo.lock().filtered.insert(key, joined.clone());
        Ok(Some(joined))
    }

    /// Members' epochs stacked; labels are the sorted union
    pub fn epochs(&self, params: &EpochParams) -> Result<Outcome<LabeledEpochs>> {
        let key = eegflow_cache::canonical_json(&params.evoked_facet())?;
        if let Some(labeled) = self.memo.lock().epochs.get(&key) {
            return Ok(Outcome::Ready(labeled.clone()));
        }

        let mut collections = Vec::new();
        let mut labels = BTreeSet::new();
        let mut reasons = Vec::new();
        for executor in &self.executors {
            match executor.epochs(params)? {
                Outcome::Ready(LabeledEpochs { epochs, labels: l }) => {
                    collections.push(epochs);
                    labels.extend(l);
                }
                Outcome::Unavailable(reason) => {
                    tracing::debug!(request = %executor.request(), %reason, "[cohort] member without epochs");
                    reasons.push(reason);
                }
            }
        }
        if collections.is_empty() {
            return Ok(first_reason(reasons).into());
        }
        let labeled = LabeledEpochs {
            epochs: EpochCollection::concatenate(collections)?,
            labels: labels.into_iter().collect(),
        };
        tracing::info!(task = %self.task, n_epochs = labeled.epochs.len(), "[cohort] epochs joined");
        self.memo.lock().epochs.insert(key, labeled.clone());
        Ok(Outcome::Ready(labeled))
    }

    /// Grand average of per-subject grand averages
    pub fn evoked(&self, params: &EpochParams) -> Result<Outcome<AveragedResponse>> {
        let key = eegflow_cache::canonical_json(&params.evoked_facet())?;
        if let Some(evoked) = self.memo.lock().evoked.get(&key) {
            return Ok(Outcome::Ready(evoked.clone()));
        }

        let mut per_subject: Vec<(String, Vec<AveragedResponse>)> = Vec::new();
        let mut reasons = Vec::new();
        for executor in &self.executors {
            match executor.evoked(params)? {
                Outcome::Ready(evoked) => {
                    let subject = &executor.request().subject;
                    match per_subject.iter_mut().find(|(s, _)| s == subject) {
                        Some((_, runs)) => runs.push(evoked),
                        None => per_subject.push((subject.clone(), vec![evoked])),
                    }
                }
                Outcome::Unavailable(reason) => reasons.push(reason),
            }
        }
        if per_subject.is_empty() {
            return Ok(first_reason(reasons).into());
        }

        let subjects = per_subject
            .into_iter()
            .map(|(_, runs)| average_of(runs))
            .collect::<Result<Vec<_>>>()?;
        let n_subjects = subjects.len();
        let evoked = average_of(subjects)?;
        tracing::info!(task = %self.task, subjects = n_subjects, nave = evoked.nave(), "[cohort] evoked averaged");
        self.memo.lock().evoked.insert(key, evoked.clone());
        Ok(Outcome::Ready(evoked))
    }
}

/// The single response as is, or the grand average of several
fn average_of(mut responses: Vec<AveragedResponse>) -> Result<AveragedResponse> {
    if responses.len() == 1
        && let Some(only) = responses.pop()
    {
        return Ok(only);
    }
    Ok(AveragedResponse::grand_average(responses)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{RawLoader, TaskRequest};
    use eegflow_cache::{ArtifactCache, PipelineVersion};
    use eegflow_signal::{Annotation, ChannelInfo};
    use ndarray::Array2;
    use std::sync::Arc;

    struct Fixed {
        scale: f64,
        trials: usize,
    }

    impl RawLoader for Fixed {
        fn load_raw(&self) -> Result<TimeSeriesBuffer> {
            let data = Array2::from_shape_fn((2, 1000), |(c, t)| {
                self.scale * ((c + 1) as f64 * t as f64 * 0.2).sin() * 1e-5
            });
            let mut buf = TimeSeriesBuffer::new(data, 100.0, vec![ChannelInfo::eeg("E1"), ChannelInfo::eeg("E2")])?;
            buf.annotate((0..self.trials).map(|i| Annotation::new(1.0 + i as f64, 0.0, "contrastTrial_start")));
            Ok(buf)
        }

        fn load_events(&self) -> Result<Option<EventTable>> {
            Ok(Some(Table::parse_tsv(&format!("onset\tvalue\n{}\tx\n", self.trials))))
        }

        fn load_channels(&self) -> Result<Option<Table>> {
            Ok(Some(Table::parse_tsv("name\ttype\nE1\tEEG\n")))
        }

        fn load_electrodes(&self) -> Result<Option<Table>> {
            Ok(None)
        }

        fn load_metadata(&self) -> Result<Value> {
            Ok(serde_json::json!({ "trials": self.trials }))
        }
    }

    fn cohort(dir: &tempfile::TempDir, task: &str, members: &[(&str, Option<&str>, usize)]) -> CohortExecutor {
        let cache = Arc::new(ArtifactCache::new(dir.path(), PipelineVersion::default()).unwrap());
        let executors = members
            .iter()
            .map(|&(subject, run, trials)| {
                let mut request = TaskRequest::new(subject, task);
                if let Some(run) = run {
                    request = request.with_run(run);
                }
                TaskExecutor::new(request, Arc::new(Fixed { scale: 1.0, trials }), cache.clone())
            })
            .collect();
        CohortExecutor::new(task, executors)
    }

    fn params() -> EpochParams {
        EpochParams {
            tmin: -0.2,
            tmax: 0.5,
            ..EpochParams::default()
        }
    }

    #[test]
    fn test_epochs_concatenate() {
        let dir = tempfile::TempDir::new().unwrap();
        let c = cohort(&dir, "contrastChangeDetection", &[("S1", None, 3), ("S2", None, 4)]);
        let out = c.epochs(&params()).unwrap().ready().unwrap();
        assert_eq!(out.epochs.len(), 7);
        assert_eq!(out.labels, vec!["trial_start"]);
    }

    #[test]
    fn test_evoked_weights_subjects_equally() {
        let dir = tempfile::TempDir::new().unwrap();
        let c = cohort(
            &dir,
            "contrastChangeDetection",
            &[("S1", Some("1"), 2), ("S1", Some("2"), 3), ("S2", None, 4)],
        );
        let evoked = c.evoked(&params()).unwrap().ready().unwrap();
        assert_eq!(evoked.nave(), 9);
        // Memoized: identical result without recomputation
        assert_eq!(c.evoked(&params()).unwrap().ready().unwrap(), evoked);
    }

    #[test]
    fn test_side_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let c = cohort(&dir, "contrastChangeDetection", &[("S1", None, 1), ("S2", None, 2)]);
        assert_eq!(c.events().unwrap().len(), 2);
        assert_eq!(c.metadata().unwrap()["trials"], 1);
        assert!(c.channels().unwrap().is_some());
        assert!(c.electrodes().unwrap().is_none());
        let joined = c.filtered(&FilterParams::default()).unwrap().unwrap();
        assert_eq!(joined.n_samples(), 2000);
    }

    #[test]
    fn test_unsupported_cohort() {
        let dir = tempfile::TempDir::new().unwrap();
        let c = cohort(&dir, "nback", &[("S1", None, 1)]);
        let out = c.evoked(&params()).unwrap();
        assert!(matches!(out.unavailable(), Some(Unavailable::UnsupportedTask { .. })));
        let empty = CohortExecutor::new("nback", Vec::new());
        assert_eq!(empty.epochs(&params()).unwrap().unavailable(), Some(&Unavailable::NoEvents));
        assert!(empty.filtered(&FilterParams::default()).unwrap().is_none());
    }
}
