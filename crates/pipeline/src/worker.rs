//! Async front end: each request runs start to finish on one blocking worker

use crate::bids::BidsLoader;
use crate::cohort::CohortExecutor;
use crate::executor::TaskExecutor;
use crate::flight::SingleFlight;
use crate::loader::{RawLoader, TaskRequest};
use crate::outcome::Outcome;
use crate::params::{EpochParams, FilterParams};
use crate::processor::ProcessorOptions;
use crate::strategy::{LabeledEpochs, StrategyRegistry};
use crate::{PipelineError, Result};
use eegflow_cache::ArtifactCache;
use eegflow_signal::{AveragedResponse, TimeSeriesBuffer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Creates the loader for a recording
pub trait LoaderFactory: Send + Sync {
    /// Loader for `request`
    fn loader(&self, request: &TaskRequest) -> Arc<dyn RawLoader>;
}

/// BIDS dataset rooted at a directory
#[derive(Debug, Clone)]
pub struct BidsDataset {
    root: PathBuf,
}

impl BidsDataset {
    /// Dataset at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LoaderFactory for BidsDataset {
    fn loader(&self, request: &TaskRequest) -> Arc<dyn RawLoader> {
        Arc::new(BidsLoader::new(self.root.clone(), request.clone()))
    }
}

/// What to compute
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Cleaned continuous buffer
    Filtered(FilterParams),
    /// Epochs
    Epochs(EpochParams),
    /// Trial average
    Evoked(EpochParams),
}

impl Job {
    /// Short name for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Filtered(_) => "filtered",
            Self::Epochs(_) => "epochs",
            Self::Evoked(_) => "evoked",
        }
    }
}

/// Result of a [`Job`]
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Cleaned continuous buffer
    Filtered(TimeSeriesBuffer),
    /// Epochs or the reason there are none
    Epochs(Outcome<LabeledEpochs>),
    /// Average or the reason there is none
    Evoked(Outcome<AveragedResponse>),
}

/// Runs pipeline requests off the async runtime
///
/// All requests share the cache, the strategy registry and the single-flight
/// table. Each request gets a child of the worker's shutdown token.
#[derive(Clone)]
pub struct PipelineWorker {
    cache: Arc<ArtifactCache>,
    loaders: Arc<dyn LoaderFactory>,
    strategies: Arc<StrategyRegistry>,
    flights: Arc<SingleFlight>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for PipelineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineWorker")
            .field("cache", &self.cache.root())
            .field("strategies", &self.strategies)
            .field("in_flight", &self.flights.in_flight())
            .finish_non_exhaustive()
    }
}

impl PipelineWorker {
    /// Worker with the default strategies
    #[must_use]
    pub fn new(cache: Arc<ArtifactCache>, loaders: Arc<dyn LoaderFactory>) -> Self {
        Self {
            cache,
            loaders,
            strategies: Arc::new(StrategyRegistry::default()),
            flights: Arc::new(SingleFlight::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the strategy registry
    #[must_use]
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = Arc::new(strategies);
        self
    }

    /// The shared cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Cancel every running and future request
    pub fn shutdown(&self) {
        tracing::info!("[worker] shutdown requested");
        self.shutdown.cancel();
    }

    /// Token for one request, cancelled by [`Self::shutdown`]
    #[must_use]
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    fn executor(&self, request: TaskRequest, cancel: CancellationToken) -> TaskExecutor {
        let options = ProcessorOptions {
            strategies: Arc::clone(&self.strategies),
            flights: Arc::clone(&self.flights),
            cancel,
        };
        let loader = self.loaders.loader(&request);
        TaskExecutor::with_options(request, loader, Arc::clone(&self.cache), options)
    }

    /// Run `job` for one recording
    pub async fn run(&self, request: TaskRequest, job: Job) -> Result<Response> {
        self.run_with(request, job, self.request_token()).await
    }

    /// Run `job` for one recording under an explicit cancellation token
    #[tracing::instrument(name = "worker_run", skip_all, fields(request = %request, job = job.kind()))]
    pub async fn run_with(&self, request: TaskRequest, job: Job, cancel: CancellationToken) -> Result<Response> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: "start" });
        }
        let executor = self.executor(request, cancel);
        tokio::task::spawn_blocking(move || match job {
            Job::Filtered(params) => executor.filtered(&params).map(Response::Filtered),
            Job::Epochs(params) => executor.epochs(&params).map(Response::Epochs),
            Job::Evoked(params) => executor.evoked(&params).map(Response::Evoked),
        })
        .await
        .map_err(|e| PipelineError::Worker {
            message: e.to_string(),
        })?
    }

    /// Run `job` over a cohort of recordings of `task`
    #[tracing::instrument(name = "worker_run_cohort", skip_all, fields(task = %task, members = requests.len(), job = job.kind()))]
    pub async fn run_cohort(&self, task: String, requests: Vec<TaskRequest>, job: Job) -> Result<Response> {
        if requests.is_empty() {
            return Err(PipelineError::params("a cohort needs at least one recording"));
        }
        let cancel = self.request_token();
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: "start" });
        }
        let executors = requests
            .into_iter()
            .map(|r| self.executor(r, cancel.clone()))
            .collect();
        let cohort = CohortExecutor::new(task, executors);
        tokio::task::spawn_blocking(move || match job {
            Job::Filtered(params) => cohort
                .filtered(&params)?
                .map(Response::Filtered)
                .ok_or_else(|| PipelineError::params("a cohort needs at least one recording")),
            Job::Epochs(params) => cohort.epochs(&params).map(Response::Epochs),
            Job::Evoked(params) => cohort.evoked(&params).map(Response::Evoked),
        })
        .await
        .map_err(|e| PipelineError::Worker {
            message: e.to_string(),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Unavailable;
    use eegflow_cache::PipelineVersion;

    fn worker(dir: &tempfile::TempDir) -> PipelineWorker {
        let cache = ArtifactCache::new(dir.path().join("cache"), PipelineVersion::default()).unwrap();
        PipelineWorker::new(Arc::new(cache), Arc::new(BidsDataset::new(dir.path().join("data"))))
    }

    #[tokio::test]
    async fn test_unsupported_task_is_a_value() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = worker(&dir)
            .run(TaskRequest::new("sub-01", "nback"), Job::Epochs(EpochParams::default()))
            .await
            .unwrap();
        assert_eq!(
            out,
            Response::Epochs(Outcome::Unavailable(Unavailable::UnsupportedTask { task: "nback".into() }))
        );
    }

    #[tokio::test]
    async fn test_missing_recording_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = worker(&dir)
            .run(TaskRequest::new("sub-01", "RestingState"), Job::Filtered(FilterParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_cancels() {
        let dir = tempfile::TempDir::new().unwrap();
        let w = worker(&dir);
        w.shutdown();
        let err = w
            .run(TaskRequest::new("sub-01", "RestingState"), Job::Filtered(FilterParams::default()))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        let err = w
            .run_cohort("RestingState".into(), Vec::new(), Job::Filtered(FilterParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Params { .. }));
    }
}
