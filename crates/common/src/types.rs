//! Core types for Materialstore

use std::str::FromStr;

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of a logical job; the first level of a store address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobName(String);

impl JobName {
    const MAX_LEN: usize = 255;

    /// Validate a job name: `[A-Za-z0-9._-]`, at most 255 bytes, not `.` or `..`
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if name.is_empty() || name.len() > Self::MAX_LEN || !valid_chars || name == "." || name == ".." {
            return Err(Error::InvalidJobName(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<JobName> for String {
    fn from(name: JobName) -> Self {
        name.0
    }
}

/// Point in time identifying one run of a job; the second level of a store address.
///
/// The canonical form `YYYYMMDD_hhmmss` sorts lexicographically in
/// chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobTimestamp(NaiveDateTime);

impl JobTimestamp {
    pub const FORMAT: &'static str = "%Y%m%d_%H%M%S";

    /// Current local time truncated to whole seconds
    pub fn now() -> Self {
        let now = Local::now().naive_local();
        Self(now.with_nanosecond(0).unwrap_or(now))
    }

    /// Parse the canonical `YYYYMMDD_hhmmss` form
    pub fn parse(text: &str) -> Result<Self> {
        // chrono accepts unpadded fields; the canonical form is fixed-width
        if text.len() != 15 {
            return Err(Error::InvalidTimestamp(text.to_string()));
        }
        NaiveDateTime::parse_from_str(text, Self::FORMAT)
            .map(Self)
            .map_err(|_| Error::InvalidTimestamp(text.to_string()))
    }

    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(seconds))
    }
}

impl std::fmt::Display for JobTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for JobTimestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobTimestamp {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<JobTimestamp> for String {
    fn from(ts: JobTimestamp) -> Self {
        ts.to_string()
    }
}

/// Content kind of a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Txt,
    Json,
    Html,
    Csv,
    Xml,
    Binary,
}

impl FileType {
    pub const ALL: [FileType; 10] = [
        FileType::Png,
        FileType::Jpeg,
        FileType::Gif,
        FileType::Bmp,
        FileType::Txt,
        FileType::Json,
        FileType::Html,
        FileType::Csv,
        FileType::Xml,
        FileType::Binary,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Png => "png",
            FileType::Jpeg => "jpg",
            FileType::Gif => "gif",
            FileType::Bmp => "bmp",
            FileType::Txt => "txt",
            FileType::Json => "json",
            FileType::Html => "html",
            FileType::Csv => "csv",
            FileType::Xml => "xml",
            FileType::Binary => "bin",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            FileType::Png => "image/png",
            FileType::Jpeg => "image/jpeg",
            FileType::Gif => "image/gif",
            FileType::Bmp => "image/bmp",
            FileType::Txt => "text/plain",
            FileType::Json => "application/json",
            FileType::Html => "text/html",
            FileType::Csv => "text/csv",
            FileType::Xml => "application/xml",
            FileType::Binary => "application/octet-stream",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, FileType::Png | FileType::Jpeg | FileType::Gif | FileType::Bmp)
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            FileType::Txt | FileType::Json | FileType::Html | FileType::Csv | FileType::Xml
        )
    }

    /// Look up a file type by extension, case-insensitively
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "jpeg" => Some(FileType::Jpeg),
            "htm" => Some(FileType::Html),
            _ => Self::ALL.iter().copied().find(|t| t.extension() == ext),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
