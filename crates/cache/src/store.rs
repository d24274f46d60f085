//! File-backed artifact store with corruption quarantine
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<subject>/<task>/run-<run|none>/<stage>/<hash16>-<ver>_<type>.bin
//! <root>/.../<hash16>-<ver>_epo.labels.json     optional label sidecar
//! <root>/.../<hash16>-<ver>_<type>.bin.bad      quarantined artifact
//! <root>/.../<hash16>-<ver>_<type>.bin.1.bad    later quarantine of the same name
//! ```
//!
//! Validity is path existence plus a successful decode. Nothing expires; a
//! parameter change or a pipeline version bump simply derives a new name.

use crate::codec;
use crate::config::CacheConfig;
use crate::key::{CacheKey, PipelineVersion, Stage};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of encoded artifacts
pub const ARTIFACT_EXT: &str = "bin";
/// Extension of epoch label sidecars
pub const LABELS_EXT: &str = "labels.json";
/// Suffix appended to quarantined files
pub const QUARANTINE_SUFFIX: &str = ".bad";

/// Result of a cache lookup
#[derive(Debug)]
pub enum Lookup<T> {
    /// Artifact present and decoded
    Hit(T),
    /// Nothing stored under the key
    Miss,
    /// Artifact present but unreadable; it was moved aside
    Corrupt {
        /// Where the bad file now lives, when the rename succeeded
        quarantined: Option<PathBuf>,
    },
}

impl<T> Lookup<T> {
    /// Collapse to `Some(artifact)` on hit; corruption reads as a miss
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Corrupt { .. } => None,
        }
    }

    /// Whether the lookup produced an artifact
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    fn map_hit<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Hit(value) => Lookup::Hit(f(value)),
            Self::Miss => Lookup::Miss,
            Self::Corrupt { quarantined } => Lookup::Corrupt { quarantined },
        }
    }
}

/// Aggregate counts over the cache root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live artifact files
    pub artifacts: usize,
    /// Label sidecars
    pub label_files: usize,
    /// Quarantined files
    pub quarantined: usize,
    /// Total bytes of all of the above
    pub bytes: u64,
}

/// Persist and retrieve pipeline artifacts
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    pipeline_version: PipelineVersion,
}

impl ArtifactCache {
    /// Open a cache from configuration, resolving and creating its root
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let root = config.resolve_root()?;
        Self::new(root, config.pipeline_version.clone())
    }

    /// Open a cache at an explicit root
    pub fn new(root: impl Into<PathBuf>, pipeline_version: PipelineVersion) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create_dir_all"))?;
        tracing::info!(
            base = %root.display(),
            pipeline = %pipeline_version,
            "[cache] init"
        );
        Ok(Self {
            root,
            pipeline_version,
        })
    }

    /// Cache root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version stamp used for keys derived through [`Self::key`]
    #[must_use]
    pub fn pipeline_version(&self) -> &PipelineVersion {
        &self.pipeline_version
    }

    /// Derive a key stamped with this cache's pipeline version
    pub fn key<P: Serialize + ?Sized>(
        &self,
        subject: &str,
        task: &str,
        run: Option<&str>,
        stage: Stage,
        params: &P,
    ) -> Result<CacheKey> {
        CacheKey::derive(subject, task, run, stage, params, &self.pipeline_version)
    }

    /// Full path of the artifact file for `key`
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.subdir()).join(format!(
            "{}_{}.{ARTIFACT_EXT}",
            key.filename_stem(),
            key.stage().artifact_type()
        ))
    }

    /// Full path of the label sidecar for `key`
    #[must_use]
    pub fn labels_path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.subdir()).join(format!(
            "{}_{}.{LABELS_EXT}",
            key.filename_stem(),
            key.stage().artifact_type()
        ))
    }

    /// Whether an artifact file exists for `key` (it may still be corrupt)
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Look up an artifact, quarantining it if it cannot be decoded
    pub fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Lookup<T> {
        self.lookup_inner::<T>(key, false)
            .map_hit(|(artifact, _)| artifact)
    }

    /// Load an artifact; absent and corrupt entries are both `None`
    pub fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.lookup(key).into_option()
    }

    /// Load an artifact together with its optional label sidecar
    pub fn load_labeled<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Option<(T, Option<Vec<String>>)> {
        self.lookup_inner::<T>(key, true).into_option()
    }

    /// Look up an artifact and its label sidecar
    pub fn lookup_labeled<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Lookup<(T, Option<Vec<String>>)> {
        self.lookup_inner::<T>(key, true)
    }

    fn lookup_inner<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        with_labels: bool,
    ) -> Lookup<(T, Option<Vec<String>>)> {
        let path = self.path_for(key);
        let artifact = key.stage().dir_name();
        tracing::debug!(
            artifact,
            file = %file_name(&path),
            key = %key.summary(),
            "[cache] GET"
        );

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    artifact,
                    file = %file_name(&path),
                    subdir = %key.subdir().display(),
                    version = %key.pipeline_version(),
                    "[cache] MISS"
                );
                return Lookup::Miss;
            }
            Err(e) => {
                let quarantined = self.quarantine(key, &Error::io(e, &path, "read"));
                return Lookup::Corrupt { quarantined };
            }
        };

        let decoded = codec::decode::<T>(&bytes).and_then(|value| {
            let labels = if with_labels {
                self.read_labels(key)?
            } else {
                None
            };
            Ok((value, labels))
        });

        match decoded {
            Ok(hit) => {
                tracing::info!(
                    artifact,
                    file = %file_name(&path),
                    subdir = %key.subdir().display(),
                    version = %key.pipeline_version(),
                    "[cache] HIT"
                );
                Lookup::Hit(hit)
            }
            Err(err) => {
                let quarantined = self.quarantine(key, &err);
                Lookup::Corrupt { quarantined }
            }
        }
    }

    fn read_labels(&self, key: &CacheKey) -> Result<Option<Vec<String>>> {
        let path = self.labels_path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::corrupt(format!("unreadable labels sidecar: {e}"))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::corrupt(format!("invalid labels sidecar: {e}")))
    }

    /// Move a corrupt artifact (and its sidecar) aside
    fn quarantine(&self, key: &CacheKey, err: &Error) -> Option<PathBuf> {
        let path = self.path_for(key);
        let bad = quarantine_target(&path);
        match fs::rename(&path, &bad) {
            Ok(()) => {
                let labels = self.labels_path_for(key);
                if labels.exists() {
                    let labels_bad = quarantine_target(&labels);
                    if fs::rename(&labels, &labels_bad).is_err() {
                        let _ = fs::remove_file(&labels);
                    }
                }
                tracing::warn!(
                    artifact = key.stage().dir_name(),
                    quarantined = %file_name(&bad),
                    error = %err,
                    "[cache] Corrupt artifact quarantined"
                );
                Some(bad)
            }
            Err(rename_err) => {
                tracing::warn!(
                    artifact = key.stage().dir_name(),
                    file = %file_name(&path),
                    error = %err,
                    rename_error = %rename_err,
                    "[cache] Corrupt artifact read (and could not quarantine)"
                );
                None
            }
        }
    }

    /// Write an artifact, replacing any previous file atomically
    pub fn try_save<T: Serialize + ?Sized>(&self, artifact: &T, key: &CacheKey) -> Result<PathBuf> {
        let path = self.path_for(key);
        let bytes = codec::encode(artifact)?;
        write_atomic(&path, &bytes)?;
        tracing::info!(
            artifact = key.stage().dir_name(),
            file = %file_name(&path),
            bytes = bytes.len(),
            version = %key.pipeline_version(),
            "[cache] SAVE"
        );
        Ok(path)
    }

    /// Write an artifact; failures are logged and reported as `None`
    ///
    /// Callers keep using the in-memory artifact they already hold.
    pub fn save<T: Serialize + ?Sized>(&self, artifact: &T, key: &CacheKey) -> Option<PathBuf> {
        match self.try_save(artifact, key) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::error!(
                    artifact = key.stage().dir_name(),
                    key = %key.summary(),
                    error = %err,
                    "[cache] SAVE failed"
                );
                None
            }
        }
    }

    /// Write an artifact plus its label sidecar
    ///
    /// The sidecar is only written after the artifact itself succeeded; a
    /// stale sidecar from a previous build is removed when `labels` is `None`.
    pub fn save_labeled<T: Serialize + ?Sized>(
        &self,
        artifact: &T,
        key: &CacheKey,
        labels: Option<&[String]>,
    ) -> Option<PathBuf> {
        let path = self.save(artifact, key)?;
        let labels_path = self.labels_path_for(key);
        match labels {
            Some(labels) => {
                let written = serde_json::to_vec(labels)
                    .map_err(|e| Error::serialization(format!("Failed to encode labels: {e}")))
                    .and_then(|json| write_atomic(&labels_path, &json));
                match written {
                    Ok(()) => {
                        tracing::info!(file = %file_name(&labels_path), "[cache] SAVE epochs labels");
                    }
                    Err(err) => {
                        // An artifact without its sidecar would load with no labels.
                        let _ = fs::remove_file(&path);
                        tracing::error!(error = %err, "[cache] SAVE labels failed");
                        return None;
                    }
                }
            }
            None => {
                let _ = fs::remove_file(&labels_path);
            }
        }
        Some(path)
    }

    /// All quarantined files under the root
    pub fn quarantined(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && is_quarantined(entry.path()) {
                out.push(entry.into_path());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Delete every quarantined file, returning how many were removed
    pub fn purge_quarantine(&self) -> Result<usize> {
        let files = self.quarantined()?;
        for file in &files {
            fs::remove_file(file).map_err(|e| Error::io(e, file, "remove_file"))?;
        }
        tracing::info!(removed = files.len(), "[cache] purged quarantine");
        Ok(files.len())
    }

    /// Count artifacts, sidecars and quarantined files
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = file_name(path);
            if is_quarantined(path) {
                stats.quarantined += 1;
            } else if name.ends_with(&format!(".{LABELS_EXT}")) {
                stats.label_files += 1;
            } else if name.ends_with(&format!(".{ARTIFACT_EXT}")) {
                stats.artifacts += 1;
            } else {
                continue;
            }
            let len = entry
                .metadata()
                .map_err(|e| Error::configuration(format!("metadata for {name}: {e}")))?
                .len();
            stats.bytes += len;
        }
        Ok(stats)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::configuration(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(e, dir, "create"))?;
    tmp.write_all(bytes)
        .map_err(|e| Error::io(e, tmp.path(), "write"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io(e, tmp.path(), "sync"))?;
    tmp.persist(path)
        .map_err(|e| Error::io(e.error, path, "rename"))?;
    Ok(())
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// First free `<name>.bad`, then `<name>.1.bad`, `<name>.2.bad`, ...
fn quarantine_target(path: &Path) -> PathBuf {
    let first = append_suffix(path, QUARANTINE_SUFFIX);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| append_suffix(path, &format!(".{n}{QUARANTINE_SUFFIX}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

fn is_quarantined(path: &Path) -> bool {
    file_name(path).ends_with(QUARANTINE_SUFFIX)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Trace {
        sfreq: f64,
        samples: Vec<f64>,
    }

    fn trace() -> Trace {
        Trace {
            sfreq: 100.0,
            samples: (0..64).map(|i| f64::from(i).sin()).collect(),
        }
    }

    fn cache(tmp: &TempDir) -> ArtifactCache {
        ArtifactCache::new(tmp.path(), PipelineVersion::default()).unwrap()
    }

    fn key(cache: &ArtifactCache, stage: Stage) -> CacheKey {
        cache
            .key("S1", "T", None, stage, &json!({"l_freq": 4.0}))
            .unwrap()
    }

    #[test]
    fn test_miss_when_absent() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let k = key(&cache, Stage::Prefilter);
        assert!(matches!(cache.lookup::<Trace>(&k), Lookup::Miss));
        // A miss never creates directories
        assert!(!tmp.path().join("S1").exists());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let k = key(&cache, Stage::Prefilter);

        let path = cache.save(&trace(), &k).unwrap();
        assert!(path.starts_with(tmp.path().join("S1/T/run-none/prefilter")));
        assert!(file_name(&path).ends_with("-v3_eeg.bin"));
        assert_eq!(cache.load::<Trace>(&k), Some(trace()));
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let k = key(&cache, Stage::Cleaned);
        let path = cache.save(&trace(), &k).unwrap();

        fs::write(&path, b"garbage").unwrap();
        let lookup = cache.lookup::<Trace>(&k);
        let Lookup::Corrupt { quarantined } = lookup else {
            panic!("expected corrupt lookup");
        };
        assert!(!path.exists());
        let bad = quarantined.unwrap();
        assert!(bad.exists());
        assert!(file_name(&bad).ends_with(".bin.bad"));

        // Next lookup is a plain miss, and a fresh save works again
        assert!(matches!(cache.lookup::<Trace>(&k), Lookup::Miss));
        cache.save(&trace(), &k).unwrap();
        assert_eq!(cache.load::<Trace>(&k), Some(trace()));
    }

    #[test]
    fn test_repeated_corruption_keeps_earlier_quarantine() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let k = key(&cache, Stage::Cleaned);
        let path = cache.save(&trace(), &k).unwrap();

        fs::write(&path, b"first").unwrap();
        let first = cache.lookup::<Trace>(&k);
        fs::write(&path, b"second").unwrap();
        let second = cache.lookup::<Trace>(&k);

        let (
            Lookup::Corrupt { quarantined: Some(first) },
            Lookup::Corrupt { quarantined: Some(second) },
        ) = (first, second)
        else {
            panic!("expected two quarantined lookups");
        };
        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"first");
        assert_eq!(fs::read(&second).unwrap(), b"second");
        assert!(file_name(&second).ends_with(".bin.1.bad"));
        assert_eq!(cache.quarantined().unwrap().len(), 2);
        assert_eq!(cache.stats().unwrap().quarantined, 2);
    }

    #[test]
    fn test_labels_sidecar_roundtrip_and_quarantine() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let k = key(&cache, Stage::Epochs);
        let labels = vec!["open".to_string(), "close".to_string()];

        cache.save_labeled(&trace(), &k, Some(&labels)).unwrap();
        let labels_path = cache.labels_path_for(&k);
        assert!(file_name(&labels_path).ends_with("_epo.labels.json"));

        let (artifact, loaded) = cache.load_labeled::<Trace>(&k).unwrap();
        assert_eq!(artifact, trace());
        assert_eq!(loaded, Some(labels));

        fs::write(&labels_path, b"{not json").unwrap();
        assert!(cache.load_labeled::<Trace>(&k).is_none());
        assert!(!cache.path_for(&k).exists());
        assert!(!labels_path.exists());
        assert_eq!(cache.quarantined().unwrap().len(), 2);
    }

    #[test]
    fn test_saving_without_labels_drops_stale_sidecar() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let k = key(&cache, Stage::Epochs);

        cache
            .save_labeled(&trace(), &k, Some(&["a".to_string()]))
            .unwrap();
        cache.save_labeled(&trace(), &k, None).unwrap();

        let (_, labels) = cache.load_labeled::<Trace>(&k).unwrap();
        assert_eq!(labels, None);
    }

    #[test]
    fn test_stats_and_purge() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let a = key(&cache, Stage::Prefilter);
        let b = key(&cache, Stage::Epochs);
        cache.save(&trace(), &a).unwrap();
        cache
            .save_labeled(&trace(), &b, Some(&["x".to_string()]))
            .unwrap();
        fs::write(cache.path_for(&a), b"junk").unwrap();
        let _ = cache.load::<Trace>(&a);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.artifacts, 1);
        assert_eq!(stats.label_files, 1);
        assert_eq!(stats.quarantined, 1);
        assert!(stats.bytes > 0);

        assert_eq!(cache.purge_quarantine().unwrap(), 1);
        assert_eq!(cache.stats().unwrap().quarantined, 0);
    }

    #[test]
    fn test_save_failure_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let k = key(&cache, Stage::Evoked);
        // A regular file where the stage directory should be
        fs::create_dir_all(tmp.path().join("S1/T/run-none")).unwrap();
        fs::write(tmp.path().join("S1/T/run-none/evoked"), b"").unwrap();

        assert!(cache.save(&trace(), &k).is_none());
        assert!(cache.try_save(&trace(), &k).is_err());
    }
}
