//! Build parameters and their cache fingerprint.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// `./configure` flags: `name -> Some(value)` renders `--name=value`,
/// `name -> None` renders `--name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConfigureFlags(BTreeMap<String, Option<String>>);

impl ConfigureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bare flag such as `enable-debug`.
    pub fn flag(mut self, name: &str) -> Self {
        self.0.insert(strip_dashes(name), None);
        self
    }

    /// Add a flag with a value such as `with-openssl=/opt/ssl`.
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(strip_dashes(name), Some(value.to_string()));
        self
    }

    /// Parse `name` or `name=value`, with or without leading dashes.
    pub fn parse_arg(mut self, arg: &str) -> Self {
        match arg.split_once('=') {
            Some((k, v)) => self.0.insert(strip_dashes(k), Some(v.to_string())),
            None => self.0.insert(strip_dashes(arg), None),
        };
        self
    }

    /// Command-line arguments, sorted by flag name.
    pub fn to_args(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("--{k}={v}"),
                None => format!("--{k}"),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn strip_dashes(s: &str) -> String {
    s.trim_start_matches('-').to_string()
}

/// Environment variable overrides applied to the build and the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnvVars(BTreeMap<String, String>);

impl EnvVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse `KEY=VALUE`. Returns `None` when there is no `=`.
    pub fn parse_pair(self, pair: &str) -> Option<Self> {
        let (k, v) = pair.split_once('=')?;
        Some(self.set(k, v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Stable identifier of a (flags, env) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

/// Hex digits kept in the fingerprint; also the cache directory name.
const FINGERPRINT_LEN: usize = 16;

impl Fingerprint {
    /// SHA-256 over the sorted flags and sorted env pairs. Each entry is
    /// NUL-terminated so adjacent values cannot run together.
    pub fn compute(flags: &ConfigureFlags, env: &EnvVars) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"configure\0");
        for (k, v) in &flags.0 {
            hasher.update(k.as_bytes());
            if let Some(v) = v {
                hasher.update(b"=");
                hasher.update(v.as_bytes());
            }
            hasher.update(b"\0");
        }
        hasher.update(b"env\0");
        for (k, v) in &env.0 {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\0");
        }
        let digest = hex::encode(hasher.finalize());
        Fingerprint(digest[..FINGERPRINT_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
