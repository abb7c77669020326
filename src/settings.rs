//! Harness settings: where the proxy sources live and where builds go.
//!
//! Resolved from an optional TOML file (`TSQA_CONFIG`), then overridden by
//! `TSQA_SRC_DIR` and `TSQA_TMP_DIR`.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_SOURCE_DIR: &str = "~/trafficserver";
pub const DEFAULT_TMP_DIR: &str = "/tmp/tsqa";

/// On-disk settings file. Every field is optional.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&s).map_err(|e| Error::Settings(format!("{}: {e}", path.display())))
    }
}

/// Resolved harness settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub source_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// Cache root for base builds.
    pub base_envs_dir: PathBuf,
    /// Where per-test environment copies are created.
    pub work_root: PathBuf,
    pub jobs: Option<usize>,
}

impl Settings {
    /// Settings from the process environment.
    pub fn load() -> Result<Self> {
        Self::resolve(|k| std::env::var(k).ok())
    }

    /// Settings using `lookup` in place of the process environment.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match lookup("TSQA_CONFIG") {
            Some(p) => SettingsFile::load(&expand_tilde(&p))?,
            None => SettingsFile::default(),
        };
        let source_dir = lookup("TSQA_SRC_DIR")
            .map(|s| expand_tilde(&s))
            .or(file.source_dir.map(|p| expand_tilde(&p.to_string_lossy())))
            .unwrap_or_else(|| expand_tilde(DEFAULT_SOURCE_DIR));
        let tmp_dir = lookup("TSQA_TMP_DIR")
            .map(|s| expand_tilde(&s))
            .or(file.tmp_dir.map(|p| expand_tilde(&p.to_string_lossy())))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_DIR));
        Ok(Self::from_dirs(source_dir, tmp_dir).with_jobs(file.jobs))
    }

    /// Settings rooted at explicit directories.
    pub fn from_dirs(source_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        let tmp_dir = tmp_dir.into();
        Self {
            source_dir: source_dir.into(),
            base_envs_dir: tmp_dir.join("base_envs"),
            work_root: tmp_dir.join("envs"),
            tmp_dir,
            jobs: None,
        }
    }

    fn with_jobs(mut self, jobs: Option<usize>) -> Self {
        self.jobs = jobs;
        self
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match directories::BaseDirs::new() {
        Some(dirs) if rest.is_empty() => dirs.home_dir().to_path_buf(),
        Some(dirs) => dirs.home_dir().join(rest),
        None => PathBuf::from(path),
    }
}
