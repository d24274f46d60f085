//! Cache root and version configuration

use crate::key::PipelineVersion;
use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::path::PathBuf;

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "EEGFLOW_CACHE_DIR";

/// Settings used to open an [`ArtifactCache`](crate::ArtifactCache)
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Explicit root; takes precedence over every environment lookup
    pub root: Option<PathBuf>,
    /// Version stamp written into every artifact name
    pub pipeline_version: PipelineVersion,
}

impl CacheConfig {
    /// Config rooted at an explicit directory
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            pipeline_version: PipelineVersion::default(),
        }
    }

    /// Replace the pipeline version stamp
    #[must_use]
    pub fn with_version(mut self, version: PipelineVersion) -> Self {
        self.pipeline_version = version;
        self
    }

    /// Resolve the cache root, creating it if needed
    pub fn resolve_root(&self) -> Result<PathBuf> {
        let inputs = CacheInputs {
            explicit: self.root.clone(),
            eegflow_cache_dir: std::env::var(CACHE_DIR_ENV)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            xdg_cache_home: std::env::var("XDG_CACHE_HOME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            os_cache_dir: cache_dir(),
            home_dir: home_dir(),
            temp_dir: std::env::temp_dir(),
        };
        cache_root_from_inputs(inputs)
    }
}

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    explicit: Option<PathBuf>,
    eegflow_cache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) explicit root
    // 2) EEGFLOW_CACHE_DIR
    // 3) XDG_CACHE_HOME/eegflow/artifacts
    // 4) OS cache dir/eegflow/artifacts
    // 5) ~/.eegflow/cache
    // 6) TMPDIR/eegflow/cache
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.explicit.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(dir) = inputs.eegflow_cache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("eegflow/artifacts"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("eegflow/artifacts"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".eegflow/cache"));
    }
    candidates.push(inputs.temp_dir.join("eegflow/cache"));

    for path in candidates {
        // Read-only cache directories show up on shared analysis machines.
        if path.exists() {
            let marker = path.join(".write_check");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&marker)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&marker);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inputs(temp: &TempDir) -> CacheInputs {
        CacheInputs {
            explicit: None,
            eegflow_cache_dir: None,
            xdg_cache_home: None,
            os_cache_dir: None,
            home_dir: None,
            temp_dir: temp.path().to_path_buf(),
        }
    }

    #[test]
    fn test_explicit_root_wins() {
        let temp = TempDir::new().unwrap();
        let explicit = temp.path().join("explicit");
        let mut i = inputs(&temp);
        i.explicit = Some(explicit.clone());
        i.eegflow_cache_dir = Some(temp.path().join("env"));

        let root = cache_root_from_inputs(i).unwrap();
        assert_eq!(root, explicit);
        assert!(explicit.is_dir());
    }

    #[test]
    fn test_env_before_xdg() {
        let temp = TempDir::new().unwrap();
        let mut i = inputs(&temp);
        i.eegflow_cache_dir = Some(temp.path().join("env"));
        i.xdg_cache_home = Some(temp.path().join("xdg"));

        let root = cache_root_from_inputs(i).unwrap();
        assert_eq!(root, temp.path().join("env"));
    }

    #[test]
    fn test_xdg_layout() {
        let temp = TempDir::new().unwrap();
        let mut i = inputs(&temp);
        i.xdg_cache_home = Some(temp.path().join("xdg"));

        let root = cache_root_from_inputs(i).unwrap();
        assert_eq!(root, temp.path().join("xdg/eegflow/artifacts"));
    }

    #[test]
    fn test_falls_back_to_temp() {
        let temp = TempDir::new().unwrap();
        let root = cache_root_from_inputs(inputs(&temp)).unwrap();
        assert_eq!(root, temp.path().join("eegflow/cache"));
    }

    #[test]
    fn test_resolve_root_reads_env() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("from-env");
        temp_env::with_var(CACHE_DIR_ENV, Some(dir.as_os_str()), || {
            let root = CacheConfig::default().resolve_root().unwrap();
            assert_eq!(root, dir);
        });
    }
}
