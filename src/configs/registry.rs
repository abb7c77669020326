//! Scan a sysconfdir into a filename -> config mapping.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::generic::Config;
use super::records::{RecordsConfig, DEFAULT_DIRECTIVE};
use crate::error::{Error, Result};

/// One loaded config file, generic or specialized by filename.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFile {
    Generic(Config),
    Records(RecordsConfig),
}

impl ConfigFile {
    pub fn path(&self) -> &Path {
        match self {
            ConfigFile::Generic(c) => c.path(),
            ConfigFile::Records(c) => c.path(),
        }
    }

    /// Value at `section`/`key`. For records files the section is the
    /// directive (`CONFIG`, `LOCAL`).
    pub fn get(&self, section: &str, key: &str) -> Result<String> {
        match self {
            ConfigFile::Generic(c) => c.get(section, key).map(str::to_string),
            ConfigFile::Records(c) => c.get_in(section, key).map(|v| v.to_string()),
        }
    }

    /// Set from text. Records keep the existing type or infer one.
    pub fn set_str(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        match self {
            ConfigFile::Generic(c) => c.set(section, key, value),
            ConfigFile::Records(c) => {
                let directive = if section.is_empty() {
                    DEFAULT_DIRECTIVE
                } else {
                    section
                };
                c.set_str(directive, key, value)
            }
        }
    }

    pub fn contents(&self) -> String {
        match self {
            ConfigFile::Generic(c) => c.contents(),
            ConfigFile::Records(c) => c.contents(),
        }
    }

    pub fn write(&self) -> Result<()> {
        match self {
            ConfigFile::Generic(c) => c.write(),
            ConfigFile::Records(c) => c.write(),
        }
    }

    pub fn is_records(&self) -> bool {
        matches!(self, ConfigFile::Records(_))
    }

    pub fn as_generic_mut(&mut self) -> Option<&mut Config> {
        match self {
            ConfigFile::Generic(c) => Some(c),
            ConfigFile::Records(_) => None,
        }
    }
}

pub type Loader = fn(&Path) -> Result<ConfigFile>;

fn load_generic(path: &Path) -> Result<ConfigFile> {
    Config::load(path).map(ConfigFile::Generic)
}

fn load_records(path: &Path) -> Result<ConfigFile> {
    RecordsConfig::load(path).map(ConfigFile::Records)
}

/// Filenames with a specialized parser. Everything else is generic.
const LOADERS: &[(&str, Loader)] = &[("records.config", load_records as Loader)];

/// Loader registered for `name`, falling back to the generic parser.
pub fn loader_for(name: &str) -> Loader {
    LOADERS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, l)| *l)
        .unwrap_or(load_generic)
}

/// All config files of one environment, keyed by filename.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    dir: PathBuf,
    files: BTreeMap<String, ConfigFile>,
}

impl ConfigRegistry {
    /// Load every regular file directly under `dir`. Does not recurse.
    ///
    /// A file name that is not valid UTF-8 is keyed by its lossy form; the
    /// entry still reads and writes the original path.
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::NotFound(dir.to_path_buf()));
        }
        let mut files = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let name = match file_name.to_str() {
                Some(n) => n.to_string(),
                None => {
                    let lossy = file_name.to_string_lossy().into_owned();
                    tracing::warn!(
                        path = %path.display(),
                        key = %lossy,
                        "config file name is not UTF-8"
                    );
                    lossy
                }
            };
            if files.contains_key(&name) {
                return Err(Error::InvalidState(format!(
                    "two config files in {} map to the name {name:?}",
                    dir.display()
                )));
            }
            let cfg = loader_for(&name)(&path)?;
            files.insert(name, cfg);
        }
        tracing::debug!(dir = %dir.display(), count = files.len(), "scanned config dir");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Option<&ConfigFile> {
        self.files.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ConfigFile> {
        self.files.get_mut(name)
    }

    /// The `records.config` entry, if present.
    pub fn records(&self) -> Option<&RecordsConfig> {
        match self.files.get("records.config") {
            Some(ConfigFile::Records(r)) => Some(r),
            _ => None,
        }
    }

    pub fn records_mut(&mut self) -> Option<&mut RecordsConfig> {
        match self.files.get_mut("records.config") {
            Some(ConfigFile::Records(r)) => Some(r),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write every config back to disk.
    pub fn write_all(&self) -> Result<()> {
        for (name, cfg) in &self.files {
            cfg.write()?;
            tracing::trace!(file = %name, "wrote config");
        }
        Ok(())
    }
}
