//! On-disk directory layout of one installed instance.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directories of an install, all derived from `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub prefix: PathBuf,
    pub bindir: PathBuf,
    pub sbindir: PathBuf,
    pub sysconfdir: PathBuf,
    pub libdir: PathBuf,
    pub includedir: PathBuf,
    pub localstatedir: PathBuf,
    pub runtimedir: PathBuf,
    pub logdir: PathBuf,
    pub cachedir: PathBuf,
}

impl Layout {
    /// Build the layout rooted at `prefix`.
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let localstatedir = prefix.join("var");
        Self {
            bindir: prefix.join("bin"),
            sbindir: prefix.join("bin"),
            sysconfdir: prefix.join("etc").join("trafficserver"),
            libdir: prefix.join("lib"),
            includedir: prefix.join("include"),
            runtimedir: localstatedir.join("trafficserver"),
            logdir: localstatedir.join("log").join("trafficserver"),
            cachedir: localstatedir.join("trafficserver"),
            localstatedir,
            prefix,
        }
    }

    /// Path of an executable in `bindir`.
    pub fn binary(&self, name: &str) -> PathBuf {
        self.bindir.join(name)
    }

    /// Path of a file in `sysconfdir`.
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.sysconfdir.join(name)
    }

    /// Create the directories the daemon writes into at runtime.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.runtimedir)?;
        std::fs::create_dir_all(&self.logdir)?;
        Ok(())
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.prefix)
    }
}
