//! Lazy per-recording executor
//!
//! Loads each input at most once per executor and hands the processor
//! accessors over those memoized inputs.

use crate::bids::BidsLoader;
use crate::loader::{EventTable, RawLoader, Table, TaskRequest};
use crate::outcome::Outcome;
use crate::params::{EpochParams, FilterParams};
use crate::processor::{ProcessorOptions, TaskInputs, TaskProcessor};
use crate::strategy::LabeledEpochs;
use crate::Result;
use eegflow_cache::ArtifactCache;
use eegflow_signal::{AveragedResponse, TimeSeriesBuffer};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Load once under the slot's lock, then hand out clones
fn memoized<T: Clone>(slot: &Mutex<Option<T>>, load: impl FnOnce() -> Result<T>) -> Result<T> {
    let mut slot = slot.lock();
    if let Some(value) = slot.as_ref() {
        return Ok(value.clone());
    }
    let value = load()?;
    *slot = Some(value.clone());
    Ok(value)
}

struct MemoizedInputs {
    loader: Arc<dyn RawLoader>,
    raw: Mutex<Option<TimeSeriesBuffer>>,
    events: Mutex<Option<Option<EventTable>>>,
    channels: Mutex<Option<Option<Table>>>,
    electrodes: Mutex<Option<Option<Table>>>,
    metadata: Mutex<Option<Value>>,
}

impl MemoizedInputs {
    fn new(loader: Arc<dyn RawLoader>) -> Self {
        Self {
            loader,
            raw: Mutex::new(None),
            events: Mutex::new(None),
            channels: Mutex::new(None),
            electrodes: Mutex::new(None),
            metadata: Mutex::new(None),
        }
    }

    fn release_raw(&self) {
        if self.raw.lock().take().is_some() {
            tracing::debug!("[executor] released raw buffer");
        }
    }
}

impl TaskInputs for MemoizedInputs {
    fn raw(&self) -> Result<TimeSeriesBuffer> {
        memoized(&self.raw, || self.loader.load_raw())
    }

    fn events(&self) -> Result<Option<EventTable>> {
        memoized(&self.events, || self.loader.load_events())
    }
}

/// Executor for one subject/task/run
pub struct TaskExecutor {
    inputs: Arc<MemoizedInputs>,
    processor: TaskProcessor,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Executor over `loader` with default processor options
    #[must_use]
    pub fn new(request: TaskRequest, loader: Arc<dyn RawLoader>, cache: Arc<ArtifactCache>) -> Self {
        Self::with_options(request, loader, cache, ProcessorOptions::default())
    }

    /// Executor whose processor shares `options`
    #[must_use]
    pub fn with_options(
        request: TaskRequest,
        loader: Arc<dyn RawLoader>,
        cache: Arc<ArtifactCache>,
        options: ProcessorOptions,
    ) -> Self {
        let inputs = Arc::new(MemoizedInputs::new(loader));
        let processor = TaskProcessor::with_options(
            request,
            cache,
            Arc::clone(&inputs) as Arc<dyn TaskInputs>,
            options,
        );
        Self { inputs, processor }
    }

    /// Executor reading `request` from a BIDS dataset at `root`
    #[must_use]
    pub fn bids(
        root: impl Into<PathBuf>,
        request: TaskRequest,
        cache: Arc<ArtifactCache>,
        options: ProcessorOptions,
    ) -> Self {
        let loader = Arc::new(BidsLoader::new(root, request.clone()));
        Self::with_options(request, loader, cache, options)
    }

    /// The recording this executor serves
    #[must_use]
    pub fn request(&self) -> &TaskRequest {
        self.processor.request()
    }

    /// The processor bound to this executor's inputs
    #[must_use]
    pub fn processor(&self) -> &TaskProcessor {
        &self.processor
    }

    /// Raw recording
    pub fn raw(&self) -> Result<TimeSeriesBuffer> {
        self.inputs.raw()
    }

    /// Event table
    pub fn events(&self) -> Result<Option<EventTable>> {
        self.inputs.events()
    }

    /// Channel table
    pub fn channels(&self) -> Result<Option<Table>> {
        memoized(&self.inputs.channels, || self.inputs.loader.load_channels())
    }

    /// Electrode table
    pub fn electrodes(&self) -> Result<Option<Table>> {
        memoized(&self.inputs.electrodes, || self.inputs.loader.load_electrodes())
    }

    /// Recording metadata
    pub fn metadata(&self) -> Result<Value> {
        memoized(&self.inputs.metadata, || self.inputs.loader.load_metadata())
    }

    /// Cleaned buffer; the memoized raw buffer is released afterwards
    pub fn filtered(&self, params: &FilterParams) -> Result<TimeSeriesBuffer> {
        let filtered = self.processor.get_filtered(params);
        self.inputs.release_raw();
        filtered
    }

    /// Epochs
    pub fn epochs(&self, params: &EpochParams) -> Result<Outcome<LabeledEpochs>> {
        self.processor.get_epochs(params)
    }

    /// Trial average
    pub fn evoked(&self, params: &EpochParams) -> Result<Outcome<AveragedResponse>> {
        self.processor.get_evoked(params)
    }
}
