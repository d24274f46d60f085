//! Command execution and JSON summaries

use crate::errors::CliError;
use eegflow_cache::ArtifactCache;
use eegflow_pipeline::{
    ChannelSelection, EpochParams, FilterParams, Job, LabeledEpochs, Outcome, ParamSet, PipelineWorker,
    Response, TaskRequest, Unavailable,
};
use eegflow_signal::{AveragedResponse, TimeSeriesBuffer};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Which artifact a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Filtered,
    Epochs,
    Evoked,
}

/// One recording or a cohort of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Recording {
        subject: String,
        task: String,
        run: Option<String>,
    },
    Cohort {
        task: String,
        subjects: Vec<String>,
        run: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run {
        target: Target,
        kind: JobKind,
        params: Option<PathBuf>,
        stimulus: Option<String>,
    },
    CacheStats,
    CacheQuarantined,
    CachePurge,
}

fn request(subject: String, task: String, run: Option<&str>) -> TaskRequest {
    let request = TaskRequest::new(subject, task);
    match run {
        Some(run) => request.with_run(run),
        None => request,
    }
}

impl JobKind {
    /// Build the job from an optional parameter file and condition override
    pub fn job(self, params: Option<&Path>, stimulus: Option<&str>) -> miette::Result<Job> {
        if self == Self::Filtered {
            if stimulus.is_some() {
                return Err(CliError::invalid_argument("--stimulus", "conditions apply to epochs and evoked only").into());
            }
            let params = params.map_or_else(|| Ok(FilterParams::default()), FilterParams::from_file)?;
            return Ok(Job::Filtered(params));
        }
        let mut params = params.map_or_else(|| Ok(EpochParams::default()), EpochParams::from_file)?;
        if let Some(stimulus) = stimulus {
            params = params.with_stimulus(Some(stimulus));
        }
        Ok(match self {
            Self::Epochs => Job::Epochs(params),
            _ => Job::Evoked(params),
        })
    }
}

/// Run `command` and return its JSON result
pub async fn execute(command: Command, worker: &PipelineWorker) -> miette::Result<Value> {
    match command {
        Command::Run {
            target,
            kind,
            params,
            stimulus,
        } => {
            let job = kind.job(params.as_deref(), stimulus.as_deref())?;
            let filter = match &job {
                Job::Filtered(p) => p.clone(),
                Job::Epochs(p) | Job::Evoked(p) => p.filter.clone(),
            };
            let response = match target {
                Target::Recording { subject, task, run } => {
                    worker.run(request(subject, task, run.as_deref()), job).await?
                }
                Target::Cohort { task, subjects, run } => {
                    let requests = subjects
                        .into_iter()
                        .map(|s| request(s, task.clone(), run.as_deref()))
                        .collect();
                    worker.run_cohort(task, requests, job).await?
                }
            };
            Ok(summarize(&response, &filter)?)
        }
        Command::CacheStats => cache_stats(worker.cache()),
        Command::CacheQuarantined => {
            let files = worker.cache().quarantined()?;
            Ok(json!({
                "root": worker.cache().root(),
                "quarantined": files,
            }))
        }
        Command::CachePurge => {
            let removed = worker.cache().purge_quarantine()?;
            Ok(json!({ "root": worker.cache().root(), "removed": removed }))
        }
    }
}

fn cache_stats(cache: &ArtifactCache) -> miette::Result<Value> {
    let stats = cache.stats()?;
    Ok(json!({
        "root": cache.root(),
        "version": cache.pipeline_version().as_str(),
        "stats": stats,
    }))
}

/// JSON summary of a pipeline response
pub fn summarize(response: &Response, filter: &FilterParams) -> Result<Value, eegflow_pipeline::PipelineError> {
    Ok(match response {
        Response::Filtered(buffer) => filtered_summary(buffer, filter)?,
        Response::Epochs(Outcome::Ready(labeled)) => epochs_summary(labeled),
        Response::Evoked(Outcome::Ready(evoked)) => evoked_summary(evoked),
        Response::Epochs(Outcome::Unavailable(reason)) | Response::Evoked(Outcome::Unavailable(reason)) => {
            unavailable_summary(reason)
        }
    })
}

fn filtered_summary(buffer: &TimeSeriesBuffer, filter: &FilterParams) -> Result<Value, eegflow_pipeline::PipelineError> {
    let display = ChannelSelection::select(buffer, filter)?;
    Ok(json!({
        "status": "ready",
        "kind": "filtered",
        "n_channels": buffer.n_channels(),
        "n_samples": buffer.n_samples(),
        "sfreq": buffer.sfreq(),
        "duration": buffer.duration(),
        "highpass": buffer.highpass(),
        "lowpass": buffer.lowpass(),
        "bads": buffer.bads(),
        "annotations": buffer.annotations().len(),
        "bad_annotations": buffer.annotations().iter().filter(|a| a.is_bad()).count(),
        "display_channels": display.names,
    }))
}

fn epochs_summary(labeled: &LabeledEpochs) -> Value {
    let epochs = &labeled.epochs;
    json!({
        "status": "ready",
        "kind": "epochs",
        "n_epochs": epochs.len(),
        "n_channels": epochs.channels().len(),
        "n_times": epochs.n_times(),
        "sfreq": epochs.sfreq(),
        "tmin": epochs.tmin(),
        "tmax": epochs.tmax(),
        "baseline": epochs.baseline(),
        "conditions": epochs.event_id().keys().collect::<Vec<_>>(),
        "labels": labeled.labels,
    })
}

fn evoked_summary(evoked: &AveragedResponse) -> Value {
    json!({
        "status": "ready",
        "kind": "evoked",
        "comment": evoked.comment(),
        "nave": evoked.nave(),
        "n_channels": evoked.channels().len(),
        "n_times": evoked.times().len(),
        "sfreq": evoked.sfreq(),
        "tmin": evoked.tmin(),
    })
}

fn unavailable_summary(reason: &Unavailable) -> Value {
    json!({
        "status": reason.as_str(),
        "reason": reason.to_string(),
        "detail": reason,
    })
}

/// Print the result as pretty JSON on stdout
#[allow(clippy::print_stdout)]
pub fn emit(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
