//! Task-specific epoch extraction
//!
//! Each paradigm locates its own stimulus-aligned events; the window rule and
//! bad-span rejection are shared through [`EpochCollection::from_events`].

use crate::Result;
use crate::loader::EventTable;
use crate::outcome::{Outcome, Unavailable};
use eegflow_signal::{EpochCollection, EpochEvent, TimeSeriesBuffer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Background conditions of the surround-suppression paradigm
pub const BACKGROUNDS: [u8; 2] = [0, 1];
/// Foreground contrasts of the surround-suppression paradigm
pub const FOREGROUNDS: [f64; 4] = [0.0, 0.3, 0.6, 1.0];
/// Stimulus conditions of the surround-suppression paradigm
pub const STIMULI: [u8; 3] = [1, 2, 3];

/// Epochs plus the labels persisted in their sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledEpochs {
    /// The epochs
    pub epochs: EpochCollection,
    /// Per-epoch labels, or the present condition names for paradigms without per-trial metadata
    pub labels: Vec<String>,
}

/// Window bounds in seconds relative to each event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    /// Start
    pub tmin: f64,
    /// End
    pub tmax: f64,
}

/// Locates events for one paradigm and cuts epochs around them
pub trait EpochStrategy: Send + Sync {
    /// Task name the strategy is registered under
    fn name(&self) -> &'static str;

    /// Build epochs from the cleaned buffer and the recording's event table
    fn extract(
        &self,
        filtered: TimeSeriesBuffer,
        events: Option<&EventTable>,
        window: Window,
    ) -> Result<Outcome<LabeledEpochs>>;
}

/// Condition names and ids of the surround-suppression paradigm, ids `1..=24`
#[must_use]
pub fn surround_supp_event_id() -> BTreeMap<String, i32> {
    let mut table = BTreeMap::new();
    let mut id = 0;
    for bg in BACKGROUNDS {
        for fg in FOREGROUNDS {
            for stim in STIMULI {
                id += 1;
                table.insert(format!("bg{bg}_fg{fg:.1}_stim{stim}"), id);
            }
        }
    }
    table
}

/// `sample = round(onset * sfreq)`
fn onset_sample(onset: f64, sfreq: f64) -> Option<usize> {
    let sample = (onset * sfreq).round();
    (sample >= 0.0).then_some(sample as usize)
}

/// Whether the window around `sample` lies inside `n_samples`
fn window_fits(sample: usize, sfreq: f64, window: Window, n_samples: usize) -> bool {
    let lo = (window.tmin * sfreq).floor() as i64;
    let hi = (window.tmax * sfreq).ceil() as i64;
    let sample = sample as i64;
    sample + lo >= 0 && sample + hi < n_samples as i64
}

fn cut(
    filtered: &TimeSeriesBuffer,
    events: &[EpochEvent],
    event_id: BTreeMap<String, i32>,
    window: Window,
) -> Result<Option<EpochCollection>> {
    let epochs = EpochCollection::from_events(filtered, events, event_id, window.tmin, window.tmax)?;
    Ok((!epochs.is_empty()).then_some(epochs))
}

/// `stim_ON` rows labelled by background, foreground contrast and stimulus condition
#[derive(Debug, Clone, Copy, Default)]
pub struct SurroundSuppression;

impl EpochStrategy for SurroundSuppression {
    fn name(&self) -> &'static str {
        "surroundSupp"
    }

    fn extract(
        &self,
        filtered: TimeSeriesBuffer,
        events: Option<&EventTable>,
        window: Window,
    ) -> Result<Outcome<LabeledEpochs>> {
        let Some(events) = events else {
            return Ok(Unavailable::NoEvents.into());
        };
        let table = surround_supp_event_id();
        let sfreq = filtered.sfreq();

        let mut stim = Vec::new();
        for row in events.rows_where("value", "stim_ON") {
            let Some(onset) = events.get_f64(row, "onset") else {
                continue;
            };
            let label = match (
                events.get_f64(row, "background"),
                events.get_f64(row, "foreground_contrast"),
                events.get_f64(row, "stimulus_cond"),
            ) {
                (Some(bg), Some(fg), Some(st)) => format!("bg{}_fg{fg:.1}_stim{}", bg as i64, st as i64),
                _ => continue,
            };
            let Some(&id) = table.get(&label) else {
                tracing::debug!(%label, "[surroundSupp] label outside the condition table -> skip");
                continue;
            };
            let Some(sample) = onset_sample(onset, sfreq) else {
                continue;
            };
            stim.push((sample, id, label));
        }
        if stim.is_empty() {
            return Ok(Unavailable::NoEvents.into());
        }

        stim.retain(|(sample, _, _)| window_fits(*sample, sfreq, window, filtered.n_samples()));
        if stim.is_empty() {
            return Ok(Unavailable::EmptyEpochs.into());
        }

        let present: BTreeMap<String, i32> = stim
            .iter()
            .map(|(_, id, label)| (label.clone(), *id))
            .collect();
        let marks: Vec<EpochEvent> = stim
            .iter()
            .map(|&(sample, id, _)| EpochEvent { sample, id })
            .collect();
        let Some(epochs) = cut(&filtered, &marks, present, window)? else {
            return Ok(Unavailable::EmptyEpochs.into());
        };
        let labels = epochs
            .selection()
            .iter()
            .map(|&i| stim[i].2.clone())
            .collect();
        Ok(Outcome::Ready(LabeledEpochs { epochs, labels }))
    }
}

/// Eyes-open / eyes-closed instruction markers within the resting block
#[derive(Debug, Clone, Copy, Default)]
pub struct RestingState;

impl RestingState {
    /// Condition names and ids
    pub const EVENT_ID: [(&'static str, i32); 2] = [("open", 1), ("close", 2)];

    const MARKERS: [(&'static str, &'static str); 2] = [
        ("open", "instructed_toOpenEyes"),
        ("close", "instructed_toCloseEyes"),
    ];

    fn resting_span(events: &EventTable) -> Option<(f64, f64)> {
        let start = events
            .rows_where("value", "resting_start")
            .find_map(|r| events.get_f64(r, "onset"))?;
        let end = (0..events.len())
            .filter(|&r| matches!(events.get(r, "value"), Some("resting_end" | "break cnt")))
            .filter_map(|r| events.get_f64(r, "onset"))
            .last()?;
        Some((start, end))
    }
}

impl EpochStrategy for RestingState {
    fn name(&self) -> &'static str {
        "RestingState"
    }

    fn extract(
        &self,
        filtered: TimeSeriesBuffer,
        events: Option<&EventTable>,
        window: Window,
    ) -> Result<Outcome<LabeledEpochs>> {
        let Some(events) = events else {
            return Ok(Unavailable::NoEvents.into());
        };
        let filtered = match Self::resting_span(events) {
            Some((start, end)) if end > start => {
                tracing::debug!(start, end, "[RestingState] crop to resting block");
                filtered.crop(start, end)?
            }
            _ => filtered,
        };

        let sfreq = filtered.sfreq();
        let ids: HashMap<&str, i32> = Self::EVENT_ID.into_iter().collect();
        let mut marks = Vec::new();
        let mut present = Vec::new();
        for (name, marker) in Self::MARKERS {
            let before = marks.len();
            marks.extend(
                filtered
                    .annotations()
                    .iter()
                    .filter(|a| a.description == marker)
                    .filter_map(|a| onset_sample(a.onset, sfreq))
                    .map(|sample| EpochEvent { sample, id: ids[name] }),
            );
            if marks.len() > before {
                present.push(name.to_string());
            }
        }
        if marks.is_empty() {
            return Ok(Unavailable::NoEvents.into());
        }
        marks.sort_by_key(|e| (e.sample, e.id));

        let event_id = present.iter().map(|n| (n.clone(), ids[n.as_str()])).collect();
        let Some(epochs) = cut(&filtered, &marks, event_id, window)? else {
            return Ok(Unavailable::EmptyEpochs.into());
        };
        Ok(Outcome::Ready(LabeledEpochs {
            epochs,
            labels: present,
        }))
    }
}

/// Trial starts of the contrast-change-detection paradigm
#[derive(Debug, Clone, Copy, Default)]
pub struct ContrastChangeDetection;

impl ContrastChangeDetection {
    /// Condition name of every epoch
    pub const CONDITION: &'static str = "trial_start";
    const MARKER: &'static str = "contrastTrial_start";
}

impl EpochStrategy for ContrastChangeDetection {
    fn name(&self) -> &'static str {
        "contrastChangeDetection"
    }

    fn extract(
        &self,
        filtered: TimeSeriesBuffer,
        _events: Option<&EventTable>,
        window: Window,
    ) -> Result<Outcome<LabeledEpochs>> {
        let sfreq = filtered.sfreq();
        let marks: Vec<EpochEvent> = filtered
            .annotations()
            .iter()
            .filter(|a| a.description == Self::MARKER)
            .filter_map(|a| onset_sample(a.onset, sfreq))
            .map(|sample| EpochEvent { sample, id: 1 })
            .collect();
        if marks.is_empty() {
            return Ok(Unavailable::NoEvents.into());
        }
        let event_id = BTreeMap::from([(Self::CONDITION.to_string(), 1)]);
        let Some(epochs) = cut(&filtered, &marks, event_id, window)? else {
            return Ok(Unavailable::EmptyEpochs.into());
        };
        Ok(Outcome::Ready(LabeledEpochs {
            epochs,
            labels: vec![Self::CONDITION.to_string()],
        }))
    }
}

/// Strip a leading `task-` and everything from the first `_`
///
/// `task-surroundSupp_run-2` → `surroundSupp`
#[must_use]
pub fn normalize_task_name(task: &str) -> &str {
    let task = task.strip_prefix("task-").unwrap_or(task);
    task.split('_').next().unwrap_or(task)
}

/// Strategies by normalized task name
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn EpochStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("StrategyRegistry").field("tasks", &names).finish()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(SurroundSuppression);
        registry.register(RestingState);
        registry.register(ContrastChangeDetection);
        registry
    }
}

impl StrategyRegistry {
    /// Registry without any strategy
    #[must_use]
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Add or replace the strategy for its task name
    pub fn register(&mut self, strategy: impl EpochStrategy + 'static) {
        self.strategies
            .insert(strategy.name().to_string(), Arc::new(strategy));
    }

    /// Strategy for `task` after normalization
    #[must_use]
    pub fn resolve(&self, task: &str) -> Option<Arc<dyn EpochStrategy>> {
        self.strategies.get(normalize_task_name(task)).cloned()
    }

    /// Registered task names, sorted
    #[must_use]
    pub fn tasks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
