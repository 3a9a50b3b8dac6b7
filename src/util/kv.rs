//! Flat `key=value` text, the format used at every external boundary
//!
//! One entry per line, split on the first `=`. Blank lines and lines starting
//! with `#` are ignored. Values are escaped so that multi-line output such as
//! captured stdout survives a round trip on a single line.

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A line that could not be read as `key=value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line_number: usize,
    pub content: String,
}

/// Escapes backslashes, newlines and carriage returns
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape`]. Unknown escapes are kept verbatim.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parses `key=value` lines into a sorted map. Later duplicates win.
pub fn parse(text: &str) -> Result<BTreeMap<String, String>, MalformedLine> {
    let mut map = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(MalformedLine {
                line_number: idx + 1,
                content: line.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(MalformedLine {
                line_number: idx + 1,
                content: line.to_string(),
            });
        }
        map.insert(key.to_string(), unescape(value));
    }
    Ok(map)
}

/// Ordered writer for `key=value` output
#[derive(Debug, Default)]
pub struct KvWriter {
    buf: String,
}

impl KvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, key: &str, value: impl std::fmt::Display) -> &mut Self {
        let _ = writeln!(self.buf, "{}={}", key, escape(&value.to_string()));
        self
    }

    pub fn optional(&mut self, key: &str, value: Option<impl std::fmt::Display>) -> &mut Self {
        if let Some(v) = value {
            self.field(key, v);
        }
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Renders a list of indices the way array fields expect them: `0,2,5`
pub fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_multiline() {
        assert_eq!(escape("a\nb\\c\r"), "a\\nb\\\\c\\r");
        assert_eq!(unescape(&escape("line1\nline2\\n")), "line1\nline2\\n");
    }

    #[test]
    fn test_unescape_unknown_sequence_kept() {
        assert_eq!(unescape("tab\\there"), "tab\\there");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let map = parse("# header\n\nname=value\n  # indented comment\nother = x=y\n").unwrap();
        assert_eq!(map.get("name").map(String::as_str), Some("value"));
        assert_eq!(map.get("other").map(String::as_str), Some(" x=y"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_parse_reports_line_without_separator() {
        let err = parse("a=1\nnot a pair\n").unwrap_err();
        assert_eq!(err.line_number, 2);
        assert_eq!(err.content, "not a pair");
    }

    #[test]
    fn test_parse_rejects_empty_key() {
        assert!(parse("=value").is_err());
    }

    #[test]
    fn test_writer_skips_missing_optionals() {
        let mut w = KvWriter::new();
        w.field("a", 1).optional("b", None::<u32>).optional("c", Some("x"));
        assert_eq!(w.finish(), "a=1\nc=x\n");
    }

    #[test]
    fn test_join_indices() {
        assert_eq!(join_indices(&[]), "");
        assert_eq!(join_indices(&[0, 3, 7]), "0,3,7");
    }
}
