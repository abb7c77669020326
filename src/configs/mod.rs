//! Configuration files of an installed environment: parsing, editing and
//! write-back.
//!
//! Files are read under a shared advisory lock and written under an
//! exclusive one, so a daemon or a second harness never sees a half-written
//! file.

pub mod generic;
pub mod records;
pub mod registry;

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

pub use generic::Config;
pub use records::{RecordType, RecordValue, RecordsConfig};
pub use registry::{ConfigFile, ConfigRegistry};

/// Read a config file as UTF-8. A missing file is `Ok(None)`.
pub(crate) fn read_locked(path: &Path) -> Result<Option<String>> {
    let mut file = match fs::OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    fs2::FileExt::lock_shared(&file)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8(buf)
        .map_err(|e| Error::parse(path, 0, format!("invalid UTF-8: {e}")))?;
    Ok(Some(text))
}

/// Overwrite a config file with `contents`. Creates parent dirs if needed and
/// syncs before returning.
pub(crate) fn write_locked(path: &Path, contents: &str) -> Result<()> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    fs2::FileExt::lock_exclusive(&file)?;
    file.set_len(0)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Line layout of a file as read: its line terminator (taken from the first
/// line) and whether the last line was terminated. Written back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineFormat {
    crlf: bool,
    final_newline: bool,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self {
            crlf: false,
            final_newline: true,
        }
    }
}

impl LineFormat {
    pub(crate) fn detect(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }
        Self {
            crlf: text
                .split_once('\n')
                .is_some_and(|(first, _)| first.ends_with('\r')),
            final_newline: text.ends_with('\n'),
        }
    }

    /// Lines of `text` without their terminators.
    pub(crate) fn lines<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }
        text.strip_suffix('\n')
            .unwrap_or(text)
            .split('\n')
            .map(|line| {
                if self.crlf {
                    line.strip_suffix('\r').unwrap_or(line)
                } else {
                    line
                }
            })
            .collect()
    }

    pub(crate) fn join(&self, lines: Vec<String>) -> String {
        if lines.is_empty() {
            return String::new();
        }
        let eol = if self.crlf { "\r\n" } else { "\n" };
        let mut out = lines.join(eol);
        if self.final_newline {
            out.push_str(eol);
        }
        out
    }
}

/// Reject text that would split into several lines when written.
pub(crate) fn check_single_line(path: &Path, what: &str, text: &str) -> Result<()> {
    if text.contains(|c| c == '\n' || c == '\r') {
        return Err(Error::parse(path, 0, format!("{what} {text:?} contains a line break")));
    }
    Ok(())
}

/// Split off the first whitespace-delimited token; returns (token, rest).
pub(crate) fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}
