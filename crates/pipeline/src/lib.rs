//! Cached EEG processing pipeline
//!
//! [`TaskProcessor`] chains the stages of one recording through an
//! [`ArtifactCache`](eegflow_cache::ArtifactCache):
//!
//! - `get_filtered`: prefilter (filter facet) then cleaning detectors (cleaning facet)
//! - `get_epochs`: task strategy, bad-channel interpolation, condition or baseline
//! - `get_evoked`: trial average (evoked facet)
//!
//! [`TaskExecutor`] memoizes a recording's inputs for one processor,
//! [`CohortExecutor`] merges many executors, and [`PipelineWorker`] runs
//! whole requests on blocking workers behind an async front end.
//!
//! Expected "no data" results (unsupported task, no events, absent condition)
//! come back as [`Outcome::Unavailable`], never as errors.
//!
//! ```no_run
//! use eegflow_cache::{ArtifactCache, CacheConfig};
//! use eegflow_pipeline::{EpochParams, TaskExecutor, TaskRequest, ProcessorOptions};
//! use std::sync::Arc;
//!
//! # fn main() -> eegflow_pipeline::Result<()> {
//! let cache = Arc::new(ArtifactCache::open(&CacheConfig::default())?);
//! let request = TaskRequest::new("sub-NDARAB793GL3", "surroundSupp").with_run("1");
//! let executor = TaskExecutor::bids("/data/hbn", request, cache, ProcessorOptions::default());
//! match executor.evoked(&EpochParams::default())?.ready() {
//!     Some(evoked) => println!("nave = {}", evoked.nave()),
//!     None => println!("unavailable"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod bids;
pub mod brainvision;
pub mod channels;
pub mod cohort;
mod error;
pub mod executor;
pub mod flight;
pub mod loader;
pub mod outcome;
pub mod params;
pub mod processor;
pub mod session;
pub mod strategy;
pub mod worker;

pub use bids::BidsLoader;
pub use channels::{ChannelSelection, parse_channel_list};
pub use cohort::CohortExecutor;
pub use error::{PipelineError, Result};
pub use executor::TaskExecutor;
pub use flight::SingleFlight;
pub use loader::{EventTable, RawLoader, Table, TaskRequest};
pub use outcome::{Outcome, UNAVAILABLE, Unavailable};
pub use params::{EpochParams, EvokedParams, FilterParams, ParamSet};
pub use processor::{ProcessorOptions, StageCounts, TaskInputs, TaskProcessor};
pub use session::{Session, SessionId, SessionStore};
pub use strategy::{EpochStrategy, LabeledEpochs, StrategyRegistry, Window};
pub use worker::{BidsDataset, Job, LoaderFactory, PipelineWorker, Response};
