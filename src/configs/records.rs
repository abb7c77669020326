//! `records.config`: typed settings addressed by dotted key.
//!
//! Each setting is one line, `CONFIG proxy.config.http.server_ports INT 8080`.
//! The directive, key and type tag are kept in that order on rewrite, and a
//! record keeps its type tag when its value is replaced. A `STRING` record may
//! have an empty value (`CONFIG proxy.config.proxy_name STRING`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{check_single_line, read_locked, split_token, write_locked, LineFormat};
use crate::error::{Error, Result};

pub const DIRECTIVES: &[&str] = &["CONFIG", "LOCAL"];

/// Directive used when none is given.
pub const DEFAULT_DIRECTIVE: &str = "CONFIG";

pub const SERVER_PORTS_KEY: &str = "proxy.config.http.server_ports";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Int,
    Float,
    String,
    Counter,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Int => "INT",
            RecordType::Float => "FLOAT",
            RecordType::String => "STRING",
            RecordType::Counter => "COUNTER",
        }
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INT" => Ok(RecordType::Int),
            "FLOAT" => Ok(RecordType::Float),
            "STRING" => Ok(RecordType::String),
            "COUNTER" => Ok(RecordType::Counter),
            other => Err(format!("unknown record type {other:?}")),
        }
    }
}

/// A typed record value.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Int(i64),
    Float(f64),
    String(String),
    Counter(i64),
}

impl RecordValue {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordValue::Int(_) => RecordType::Int,
            RecordValue::Float(_) => RecordType::Float,
            RecordValue::String(_) => RecordType::String,
            RecordValue::Counter(_) => RecordType::Counter,
        }
    }

    /// Parse `text` as a value of type `ty`.
    pub fn parse(ty: RecordType, text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        match ty {
            RecordType::Int => text
                .parse()
                .map(RecordValue::Int)
                .map_err(|e| format!("bad INT {text:?}: {e}")),
            RecordType::Counter => text
                .parse()
                .map(RecordValue::Counter)
                .map_err(|e| format!("bad COUNTER {text:?}: {e}")),
            RecordType::Float => text
                .parse()
                .map(RecordValue::Float)
                .map_err(|e| format!("bad FLOAT {text:?}: {e}")),
            RecordType::String => Ok(RecordValue::String(text.to_string())),
        }
    }

    /// Convert to type `ty`, going through the text form when the types
    /// differ. String values are trimmed the way they are read back.
    pub fn coerce(self, ty: RecordType) -> std::result::Result<Self, String> {
        match self {
            RecordValue::String(s) => RecordValue::parse(ty, &s),
            v if v.record_type() == ty => Ok(v),
            v => RecordValue::parse(ty, &v.to_string()),
        }
    }

    /// Pick a type for untyped text: INT, then FLOAT, then STRING.
    pub fn infer(text: &str) -> Self {
        let text = text.trim();
        if let Ok(i) = text.parse() {
            RecordValue::Int(i)
        } else if let Ok(f) = text.parse() {
            RecordValue::Float(f)
        } else {
            RecordValue::String(text.to_string())
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RecordValue::Int(i) | RecordValue::Counter(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordValue::Int(i) | RecordValue::Counter(i) => write!(f, "{i}"),
            RecordValue::Float(x) => write!(f, "{x}"),
            RecordValue::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordValue {
    fn from(v: i64) -> Self {
        RecordValue::Int(v)
    }
}

impl From<f64> for RecordValue {
    fn from(v: f64) -> Self {
        RecordValue::Float(v)
    }
}

impl From<&str> for RecordValue {
    fn from(v: &str) -> Self {
        RecordValue::String(v.to_string())
    }
}

impl From<String> for RecordValue {
    fn from(v: String) -> Self {
        RecordValue::String(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Record {
    directive: String,
    key: String,
    value: RecordValue,
    raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Raw(String),
    Record(Record),
}

/// In-memory copy of a records file.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordsConfig {
    path: PathBuf,
    lines: Vec<Line>,
    format: LineFormat,
}

impl RecordsConfig {
    /// Load from `path`; a missing file yields an empty config.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match read_locked(&path)? {
            Some(text) => Self::parse(path, &text),
            None => Ok(Self {
                path,
                lines: Vec::new(),
                format: LineFormat::default(),
            }),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let path = path.into();
        let format = LineFormat::detect(text);
        let mut lines = Vec::new();
        for (idx, line) in format.lines(text).into_iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                lines.push(Line::Raw(line.to_string()));
                continue;
            }
            let record = parse_record(trimmed)
                .map_err(|message| Error::parse(&path, idx + 1, message))?;
            lines.push(Line::Record(Record {
                raw: Some(line.to_string()),
                ..record
            }));
        }
        Ok(Self {
            path,
            lines,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of a `CONFIG` record.
    pub fn get(&self, key: &str) -> Result<&RecordValue> {
        self.get_in(DEFAULT_DIRECTIVE, key)
    }

    pub fn get_in(&self, directive: &str, key: &str) -> Result<&RecordValue> {
        self.find(directive, key)
            .map(|r| &r.value)
            .ok_or_else(|| Error::key_not_found(directive, key))
    }

    /// Insert or replace a `CONFIG` record.
    pub fn set(&mut self, key: &str, value: impl Into<RecordValue>) -> Result<()> {
        self.set_in(DEFAULT_DIRECTIVE, key, value)
    }

    /// Insert or replace a record. An existing record keeps its type; a value
    /// that does not convert to it is a parse error and changes nothing.
    pub fn set_in(
        &mut self,
        directive: &str,
        key: &str,
        value: impl Into<RecordValue>,
    ) -> Result<()> {
        if !DIRECTIVES.contains(&directive) {
            return Err(Error::parse(
                &self.path,
                0,
                format!("unknown directive {directive:?}"),
            ));
        }
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(Error::parse(&self.path, 0, format!("invalid key {key:?}")));
        }
        let value = value.into();
        if let RecordValue::String(s) = &value {
            check_single_line(&self.path, "value", s)?;
        }
        let existing = self.lines.iter_mut().find_map(|l| match l {
            Line::Record(r) if r.directive == directive && r.key == key => Some(r),
            _ => None,
        });
        match existing {
            Some(r) => {
                r.value = value
                    .coerce(r.value.record_type())
                    .map_err(|message| Error::parse(&self.path, 0, message))?;
                r.raw = None;
            }
            None => {
                let ty = value.record_type();
                let value = value
                    .coerce(ty)
                    .map_err(|message| Error::parse(&self.path, 0, message))?;
                self.lines.push(Line::Record(Record {
                    directive: directive.to_string(),
                    key: key.to_string(),
                    value,
                    raw: None,
                }));
            }
        }
        Ok(())
    }

    /// Set from text, keeping the existing record's type or inferring one.
    pub fn set_str(&mut self, directive: &str, key: &str, text: &str) -> Result<()> {
        let value = match self.find(directive, key) {
            Some(r) => RecordValue::parse(r.value.record_type(), text)
                .map_err(|message| Error::parse(&self.path, 0, message))?,
            None => RecordValue::infer(text),
        };
        self.set_in(directive, key, value)
    }

    /// All records as (directive, key, value), in file order.
    pub fn records(&self) -> impl Iterator<Item = (&str, &str, &RecordValue)> {
        self.lines.iter().filter_map(|l| match l {
            Line::Record(r) => Some((r.directive.as_str(), r.key.as_str(), &r.value)),
            Line::Raw(_) => None,
        })
    }

    /// First port of `proxy.config.http.server_ports`. The value is a list of
    /// descriptors like `8080` or `8080:ipv4 8443:ssl`.
    pub fn proxy_port(&self) -> Option<u16> {
        let value = self.get(SERVER_PORTS_KEY).ok()?.to_string();
        let first = value.split_whitespace().next()?;
        let digits: String = first.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    pub fn contents(&self) -> String {
        self.format.join(
            self.lines
                .iter()
                .map(|l| match l {
                    Line::Raw(s) => s.clone(),
                    Line::Record(Record { raw: Some(r), .. }) => r.clone(),
                    Line::Record(r) => render_record(r),
                })
                .collect(),
        )
    }

    pub fn write(&self) -> Result<()> {
        write_locked(&self.path, &self.contents())
    }

    fn find(&self, directive: &str, key: &str) -> Option<&Record> {
        self.lines.iter().find_map(|l| match l {
            Line::Record(r) if r.directive == directive && r.key == key => Some(r),
            _ => None,
        })
    }
}

fn render_record(r: &Record) -> String {
    let head = format!("{} {} {}", r.directive, r.key, r.value.record_type().as_str());
    match r.value.to_string() {
        v if v.is_empty() => head,
        v => format!("{head} {v}"),
    }
}

fn parse_record(line: &str) -> std::result::Result<Record, String> {
    const SHAPE: &str = "expected `<DIRECTIVE> <key> <TYPE> <value>`";
    let (directive, rest) = split_token(line);
    if !DIRECTIVES.contains(&directive) {
        return Err(format!("unknown directive {directive:?}"));
    }
    let (key, rest) = split_token(rest);
    let (ty, value) = split_token(rest);
    if key.is_empty() || ty.is_empty() {
        return Err(SHAPE.to_string());
    }
    let ty: RecordType = ty.parse()?;
    if value.is_empty() && ty != RecordType::String {
        return Err(SHAPE.to_string());
    }
    Ok(Record {
        directive: directive.to_string(),
        key: key.to_string(),
        value: RecordValue::parse(ty, value.trim_end())?,
        raw: None,
    })
}
