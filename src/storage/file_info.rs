//! Descriptor of a backing file: location, format and the attributes the
//! codec needs to read and rewrite it.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Tsv,
    Fixed,
    Ltsv,
    Json,
    Gfm,
    Org,
    Text,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CSV" => Some(Self::Csv),
            "TSV" => Some(Self::Tsv),
            "FIXED" => Some(Self::Fixed),
            "LTSV" => Some(Self::Ltsv),
            "JSON" => Some(Self::Json),
            "GFM" => Some(Self::Gfm),
            "ORG" => Some(Self::Org),
            "TEXT" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Tsv => "TSV",
            Self::Fixed => "FIXED",
            Self::Ltsv => "LTSV",
            Self::Json => "JSON",
            Self::Gfm => "GFM",
            Self::Org => "ORG",
            Self::Text => "TEXT",
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Some(Self::Csv),
            Some("tsv") => Some(Self::Tsv),
            Some("json") => Some(Self::Json),
            Some("ltsv") => Some(Self::Ltsv),
            Some("txt" | "dat") => Some(Self::Fixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf8m,
    Sjis,
}

impl Encoding {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UTF8" => Some(Self::Utf8),
            "UTF8M" => Some(Self::Utf8m),
            "SJIS" => Some(Self::Sjis),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF8",
            Self::Utf8m => "UTF8M",
            Self::Sjis => "SJIS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineBreak {
    Lf,
    Cr,
    Crlf,
}

impl LineBreak {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LF" => Some(Self::Lf),
            "CR" => Some(Self::Cr),
            "CRLF" => Some(Self::Crlf),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lf => "LF",
            Self::Cr => "CR",
            Self::Crlf => "CRLF",
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Cr => "\r",
            Self::Crlf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonEscape {
    Backslash,
    Hex,
    HexAll,
}

impl JsonEscape {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BACKSLASH" => Some(Self::Backslash),
            "HEX" => Some(Self::Hex),
            "HEXALL" => Some(Self::HexAll),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Backslash => "BACKSLASH",
            Self::Hex => "HEX",
            Self::HexAll => "HEXALL",
        }
    }
}

/// Identity and codec attributes of a loaded table. Identity is the
/// canonical absolute path, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub format: Format,
    pub delimiter: u8,
    pub delimiter_positions: Option<Vec<usize>>,
    pub encoding: Encoding,
    pub line_break: LineBreak,
    pub no_header: bool,
    pub enclose_all: bool,
    pub json_query: String,
    pub json_escape: JsonEscape,
    pub pretty_print: bool,
    pub is_temporary: bool,
}

impl FileInfo {
    pub fn new(path: PathBuf, format: Format) -> Self {
        Self {
            path,
            delimiter: if format == Format::Tsv { b'\t' } else { b',' },
            format,
            delimiter_positions: None,
            encoding: Encoding::Utf8,
            line_break: LineBreak::Lf,
            no_header: false,
            enclose_all: false,
            json_query: String::new(),
            json_escape: JsonEscape::Backslash,
            pretty_print: false,
            is_temporary: false,
        }
    }

    pub fn temporary(name: &str) -> Self {
        let mut info = Self::new(PathBuf::from(name), Format::Csv);
        info.is_temporary = true;
        info
    }

    /// Cache key: canonical path lowered for case-insensitive lookup.
    pub fn key(&self) -> String {
        canonical_key(&self.path)
    }
}

pub fn canonical_key(path: &Path) -> String {
    // Files that do not exist yet (created tables before commit) resolve
    // through their parent so the key stays stable across the commit.
    let canonical = path.canonicalize().unwrap_or_else(|_| {
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf()),
            _ => path.to_path_buf(),
        }
    });
    canonical.to_string_lossy().to_ascii_lowercase()
}

/// Absolute form of a user-supplied path without requiring existence.
pub fn absolute_path(path: &Path, base: &Path) -> EngineResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(EngineError::new(ErrorKind::PathError, "path is empty"));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(
            Format::from_extension(Path::new("a/users.csv")),
            Some(Format::Csv)
        );
        assert_eq!(
            Format::from_extension(Path::new("logs.LTSV")),
            Some(Format::Ltsv)
        );
        assert_eq!(Format::from_extension(Path::new("noext")), None);
    }

    #[test]
    fn tsv_defaults_to_tab_delimiter() {
        let info = FileInfo::new(PathBuf::from("x.tsv"), Format::Tsv);
        assert_eq!(info.delimiter, b'\t');
    }

    #[test]
    fn key_is_case_insensitive() {
        let a = FileInfo::new(PathBuf::from("/TMP/Data.Csv"), Format::Csv);
        let b = FileInfo::new(PathBuf::from("/tmp/data.csv"), Format::Csv);
        assert_eq!(a.key(), b.key());
    }
}
