//! Generic line-oriented key/value config.
//!
//! Lines are `key value`, optionally grouped under `[section]` headers.
//! Lines before the first header belong to the unnamed section `""`.
//! Comments (`#`) and blank lines are kept as-is, and any line that has not
//! been modified is written back with its original text and line ending.
//!
//! Values are whitespace-trimmed: `key   some value  ` reads as `some value`.
//! [`Config::set`] trims too, so a value reads back the same after a write.

use std::path::{Path, PathBuf};

use super::{check_single_line, read_locked, split_token, write_locked, LineFormat};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Raw(String),
    Pair {
        key: String,
        value: String,
        raw: Option<String>,
    },
}

impl Line {
    fn classify(text: &str) -> Line {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Line::Raw(text.to_string());
        }
        let (key, value) = split_token(trimmed);
        Line::Pair {
            key: key.to_string(),
            value: value.to_string(),
            raw: Some(text.to_string()),
        }
    }

    fn render(&self) -> String {
        match self {
            Line::Raw(s) => s.clone(),
            Line::Pair { raw: Some(r), .. } => r.clone(),
            Line::Pair { key, value, .. } if value.is_empty() => key.clone(),
            Line::Pair { key, value, .. } => format!("{key} {value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Section {
    name: String,
    header: Option<String>,
    lines: Vec<Line>,
}

impl Section {
    fn new(name: &str, header: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            header,
            lines: Vec::new(),
        }
    }
}

/// In-memory copy of one configuration file. Diverges from disk until
/// [`Config::write`] is called.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    path: PathBuf,
    sections: Vec<Section>,
    format: LineFormat,
}

impl Config {
    /// Load from `path`. A missing file yields an empty config that `write`
    /// will create.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match read_locked(&path)? {
            Some(text) => Self::parse(path, &text),
            None => Ok(Self::empty(path)),
        }
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sections: vec![Section::new("", None)],
            format: LineFormat::default(),
        }
    }

    /// Parse `text` as the contents of `path`.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let mut cfg = Self::empty(path);
        cfg.format = LineFormat::detect(text);
        for (idx, line) in cfg.format.lines(text).into_iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') {
                let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']'))
                else {
                    return Err(Error::parse(&cfg.path, idx + 1, "unterminated section header"));
                };
                let name = inner.trim();
                if name.is_empty() {
                    return Err(Error::parse(&cfg.path, idx + 1, "empty section name"));
                }
                cfg.sections.push(Section::new(name, Some(line.to_string())));
                continue;
            }
            let last = cfg.sections.len() - 1;
            cfg.sections[last].lines.push(Line::classify(line));
        }
        Ok(cfg)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of the first `key` in `section`.
    pub fn get(&self, section: &str, key: &str) -> Result<&str> {
        self.section(section)
            .and_then(|s| {
                s.lines.iter().find_map(|l| match l {
                    Line::Pair { key: k, value, .. } if k == key => Some(value.as_str()),
                    _ => None,
                })
            })
            .ok_or_else(|| Error::key_not_found(section, key))
    }

    /// Insert or replace `key` in `section`, creating the section if absent.
    ///
    /// Keys must be a single token that does not start with `#` or `[`.
    /// The value is trimmed and must fit on one line.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) -> Result<()> {
        self.check_section(section)?;
        if key.is_empty()
            || key.contains(char::is_whitespace)
            || key.starts_with('#')
            || key.starts_with('[')
        {
            return Err(Error::parse(&self.path, 0, format!("invalid key {key:?}")));
        }
        let value = value.into();
        check_single_line(&self.path, "value", &value)?;
        let value = value.trim().to_string();
        let sec = self.section_mut_or_insert(section);
        for line in sec.lines.iter_mut() {
            if let Line::Pair { key: k, value: v, raw } = line {
                if k == key {
                    *v = value;
                    *raw = None;
                    return Ok(());
                }
            }
        }
        sec.lines.push(Line::Pair {
            key: key.to_string(),
            value,
            raw: None,
        });
        Ok(())
    }

    /// Append an unstructured line to `section`.
    pub fn add_line(&mut self, section: &str, line: &str) -> Result<()> {
        self.check_section(section)?;
        check_single_line(&self.path, "line", line)?;
        self.section_mut_or_insert(section)
            .lines
            .push(Line::classify(line));
        Ok(())
    }

    /// Names of all sections, the unnamed leading section first.
    pub fn sections(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Key/value pairs of `section` in file order.
    pub fn pairs(&self, section: &str) -> Vec<(&str, &str)> {
        self.section(section)
            .map(|s| {
                s.lines
                    .iter()
                    .filter_map(|l| match l {
                        Line::Pair { key, value, .. } => Some((key.as_str(), value.as_str())),
                        Line::Raw(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Render the file as it would be written.
    pub fn contents(&self) -> String {
        let mut out = Vec::new();
        for sec in &self.sections {
            match &sec.header {
                Some(h) => out.push(h.clone()),
                None if !sec.name.is_empty() => out.push(format!("[{}]", sec.name)),
                None => {}
            }
            out.extend(sec.lines.iter().map(Line::render));
        }
        self.format.join(out)
    }

    /// Write the in-memory state back to `path`.
    pub fn write(&self) -> Result<()> {
        write_locked(&self.path, &self.contents())
    }

    /// Section names must survive a `[name]` header round trip.
    fn check_section(&self, name: &str) -> Result<()> {
        if name.trim() != name || name.contains(|c| c == '[' || c == ']') {
            return Err(Error::parse(&self.path, 0, format!("invalid section name {name:?}")));
        }
        check_single_line(&self.path, "section name", name)
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut_or_insert(&mut self, name: &str) -> &mut Section {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(i) => i,
            None => {
                self.sections.push(Section::new(name, None));
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }
}
