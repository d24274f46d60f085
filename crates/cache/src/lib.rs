//! Versioned on-disk artifact cache for the eegflow pipeline
//!
//! This crate provides the persistence layer for processed EEG artifacts:
//! - Deterministic keys derived from subject, task, run, stage and parameters
//! - One directory per stage, one file per parameter hash and pipeline version
//! - Checksummed, compressed artifact encoding
//! - Quarantine of unreadable files instead of hard failures
//!
//! # Overview
//!
//! A key is only ever computed from the parameters that influence the stage
//! it names, so requesting the same filtered signal with a different epoch
//! window resolves to the same prefilter artifact. Parameters are
//! canonicalized (sorted keys, compact JSON) before hashing.
//!
//! ```no_run
//! use eegflow_cache::{ArtifactCache, CacheConfig, Stage};
//! use serde_json::json;
//!
//! # fn main() -> eegflow_cache::Result<()> {
//! let cache = ArtifactCache::open(&CacheConfig::default())?;
//! let key = cache.key("sub-01", "RestingState", None, Stage::Prefilter, &json!({"l_freq": 4.0}))?;
//! if cache.load::<Vec<f64>>(&key).is_none() {
//!     cache.save(&vec![0.0_f64; 16], &key);
//! }
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod error;
mod key;
mod store;

pub use codec::{decode, encode};
pub use config::{CACHE_DIR_ENV, CacheConfig};
pub use error::{Error, Result};
pub use key::{
    CacheKey, PARAMS_HASH_LEN, PipelineVersion, Stage, canonical_json, canonicalize, params_hash,
};
pub use store::{
    ARTIFACT_EXT, ArtifactCache, CacheStats, LABELS_EXT, Lookup, QUARANTINE_SUFFIX,
};
