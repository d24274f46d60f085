//! Deterministic cache key derivation
//!
//! A [`CacheKey`] names one artifact: the subject/task/run it was computed
//! for, the pipeline [`Stage`] that produced it, the parameter facet that
//! stage depends on, and the [`PipelineVersion`] stamp. Parameters are
//! canonicalized (object keys sorted recursively, compact separators) before
//! hashing, so structurally equal parameter sets always collide.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Number of hex characters of the parameter digest used in file names
pub const PARAMS_HASH_LEN: usize = 16;

/// Pipeline stages that own a cache namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Band-pass / resample / notch output
    Prefilter,
    /// Prefiltered signal with bad channels and bad windows marked
    Cleaned,
    /// Event-locked epoch collection
    Epochs,
    /// Trial-averaged response
    Evoked,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Self; 4] = [Self::Prefilter, Self::Cleaned, Self::Epochs, Self::Evoked];

    /// Directory name of the stage namespace
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Prefilter => "prefilter",
            Self::Cleaned => "cleaned",
            Self::Epochs => "epochs",
            Self::Evoked => "evoked",
        }
    }

    /// Artifact type tag embedded in the file name
    #[must_use]
    pub const fn artifact_type(self) -> &'static str {
        match self {
            Self::Prefilter | Self::Cleaned => "eeg",
            Self::Epochs => "epo",
            Self::Evoked => "ave",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Stamp bumped whenever processing semantics change
///
/// Participates in every key, so a bump orphans (but never deletes) all
/// artifacts written under the previous stamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineVersion(String);

impl PipelineVersion {
    /// Version of the processing semantics implemented by this workspace
    pub const CURRENT: &'static str = "v3";

    /// Create a version stamp
    ///
    /// Stamps end up in file names, so only ASCII alphanumerics, `.` and `_`
    /// are accepted.
    pub fn new(stamp: impl Into<String>) -> Result<Self> {
        let stamp = stamp.into();
        if stamp.is_empty() {
            return Err(Error::configuration("pipeline version must not be empty"));
        }
        if !stamp
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            return Err(Error::configuration(format!(
                "pipeline version '{stamp}' may only contain ASCII letters, digits, '.' and '_'"
            )));
        }
        Ok(Self(stamp))
    }

    /// The stamp as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PipelineVersion {
    fn default() -> Self {
        Self(Self::CURRENT.to_string())
    }
}

impl fmt::Display for PipelineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable identifier for a cached artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    subject: String,
    task: String,
    run: Option<String>,
    stage: Stage,
    params: Value,
    params_hash: String,
    pipeline_version: PipelineVersion,
}

impl CacheKey {
    /// Derive the key for `stage` from a parameter facet
    ///
    /// `params` is serialized to JSON and canonicalized before hashing, so the
    /// field order of the facet (or of a map passed in its place) never
    /// influences the key.
    pub fn derive<P: Serialize + ?Sized>(
        subject: &str,
        task: &str,
        run: Option<&str>,
        stage: Stage,
        params: &P,
        pipeline_version: &PipelineVersion,
    ) -> Result<Self> {
        validate_component("subject", subject)?;
        validate_component("task", task)?;
        if let Some(run) = run {
            validate_component("run", run)?;
        }

        let value = serde_json::to_value(params)
            .map_err(|e| Error::serialization(format!("Failed to encode parameters: {e}")))?;
        let params = canonicalize(value);
        let params_hash = hash_canonical(&params)?;

        Ok(Self {
            subject: subject.to_string(),
            task: task.to_string(),
            run: run.filter(|r| !r.is_empty()).map(str::to_string),
            stage,
            params,
            params_hash,
            pipeline_version: pipeline_version.clone(),
        })
    }

    /// Relative directory: `subject/task/run-{run|none}/stage`
    #[must_use]
    pub fn subdir(&self) -> PathBuf {
        let run = format!("run-{}", self.run.as_deref().unwrap_or("none"));
        PathBuf::from(&self.subject)
            .join(&self.task)
            .join(run)
            .join(self.stage.dir_name())
    }

    /// Deterministic file stem: `{params_hash}-{pipeline_version}`
    #[must_use]
    pub fn filename_stem(&self) -> String {
        format!("{}-{}", self.params_hash, self.pipeline_version)
    }

    /// Identity string unique per artifact, used for in-process coordination
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}/{}", self.subdir().display(), self.filename_stem())
    }

    /// Brief description for log lines
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "subject={}, task={}, run={}, stage={}, ver={}, params_hash={}",
            self.subject,
            self.task,
            self.run.as_deref().unwrap_or("none"),
            self.stage,
            self.pipeline_version,
            self.params_hash
        )
    }

    /// Subject identifier
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Task identifier
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Run identifier, if any
    #[must_use]
    pub fn run(&self) -> Option<&str> {
        self.run.as_deref()
    }

    /// Stage namespace
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Canonical parameter facet the key was derived from
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// First [`PARAMS_HASH_LEN`] hex characters of the facet digest
    #[must_use]
    pub fn params_hash(&self) -> &str {
        &self.params_hash
    }

    /// Pipeline version stamp
    #[must_use]
    pub fn pipeline_version(&self) -> &PipelineVersion {
        &self.pipeline_version
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

/// Recursively rebuild every JSON object with its keys in sorted order
#[must_use]
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Canonical compact JSON encoding of any serializable parameter set
pub fn canonical_json<P: Serialize + ?Sized>(params: &P) -> Result<String> {
    let value = serde_json::to_value(params)
        .map_err(|e| Error::serialization(format!("Failed to encode parameters: {e}")))?;
    serde_json::to_string(&canonicalize(value))
        .map_err(|e| Error::serialization(format!("Failed to serialize parameters: {e}")))
}

/// Hash a parameter set the way [`CacheKey::derive`] does
pub fn params_hash<P: Serialize + ?Sized>(params: &P) -> Result<String> {
    let value = serde_json::to_value(params)
        .map_err(|e| Error::serialization(format!("Failed to encode parameters: {e}")))?;
    hash_canonical(&canonicalize(value))
}

fn hash_canonical(canonical: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(canonical)
        .map_err(|e| Error::serialization(format!("Failed to serialize parameters: {e}")))?;
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(PARAMS_HASH_LEN);
    Ok(hex)
}

fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() && what != "run" {
        return Err(Error::configuration(format!("{what} must not be empty")));
    }
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(Error::configuration(format!(
            "{what} '{value}' is not a valid path component"
        )));
    }
    Ok(())
}
