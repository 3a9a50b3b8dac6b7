//! File names in the shared result directory
//!
//! `suitey_result_<suite-id>_<pid>_<random>` and the matching
//! `suitey_output_<suite-id>_<pid>_<random>`. Suite ids may contain `_`, so
//! parsing anchors on the fixed trailing `_<pid>_<random>` suffix (decimal
//! pid, eight lowercase hex digits) instead of splitting on every separator.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

pub const FILE_PREFIX: &str = "suitey";

/// Prefix of in-flight temp files; never matches the published pattern
pub const TEMP_PREFIX: &str = ".suitey-tmp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Result,
    Output,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Result => "result",
            FileKind::Output => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultFileName {
    pub kind: FileKind,
    pub suite_id: String,
    pub pid: u32,
    pub random: String,
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^suitey_(result|output)_(.+)_(\d+)_([0-9a-f]{8})$")
            .expect("result file pattern is valid")
    })
}

/// Maps a suite id onto `[A-Za-z0-9._-]`, keeping `_`
pub fn sanitize_suite_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "suite".to_string()
    } else {
        cleaned
    }
}

impl ResultFileName {
    /// A fresh name for this process with a random suffix
    pub fn new(kind: FileKind, suite_id: &str) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            kind,
            suite_id: sanitize_suite_id(suite_id),
            pid: std::process::id(),
            random,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let caps = pattern().captures(name)?;
        let kind = match &caps[1] {
            "result" => FileKind::Result,
            _ => FileKind::Output,
        };
        Some(Self {
            kind,
            suite_id: caps[2].to_string(),
            pid: caps[3].parse().ok()?,
            random: caps[4].to_string(),
        })
    }

    /// Same suite, pid and random suffix, other kind
    pub fn sibling(&self, kind: FileKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

impl fmt::Display for ResultFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            FILE_PREFIX,
            self.kind.as_str(),
            self.suite_id,
            self.pid,
            self.random
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_display_and_parse() {
        let name = ResultFileName {
            kind: FileKind::Result,
            suite_id: "unit".into(),
            pid: 4242,
            random: "0a1b2c3d".into(),
        };
        let text = name.to_string();
        assert_eq!(text, "suitey_result_unit_4242_0a1b2c3d");
        assert_eq!(ResultFileName::parse(&text), Some(name));
    }

    #[parameterized(
        plain = { "integration" },
        one_separator = { "unit_tests" },
        looks_like_suffix = { "suite_123_deadbeef" },
        many_separators = { "a_1_2_3_4" },
        trailing_separator = { "ends_" },
        numeric = { "2024" },
    )]
    fn test_suite_ids_with_separators_round_trip(suite: &str) {
        let name = ResultFileName::new(FileKind::Output, suite);
        let parsed = ResultFileName::parse(&name.to_string()).unwrap();
        assert_eq!(parsed.suite_id, suite);
        assert_eq!(parsed.pid, std::process::id());
        assert_eq!(parsed.random, name.random);
        assert_eq!(parsed.kind, FileKind::Output);
    }

    #[test]
    fn test_all_digit_random_still_anchors_on_suffix() {
        let text = "suitey_result_a_1_2_33_12345678";
        let parsed = ResultFileName::parse(text).unwrap();
        assert_eq!(parsed.suite_id, "a_1_2");
        assert_eq!(parsed.pid, 33);
        assert_eq!(parsed.random, "12345678");
    }

    #[parameterized(
        temp_file = { ".suitey-tmp-abc" },
        missing_random = { "suitey_result_unit_4242" },
        uppercase_random = { "suitey_result_unit_1_DEADBEEF" },
        short_random = { "suitey_result_unit_1_abc" },
        other_kind = { "suitey_log_unit_1_0a1b2c3d" },
        foreign_prefix = { "other_result_unit_1_0a1b2c3d" },
        empty_suite = { "suitey_result__1_0a1b2c3d" },
    )]
    fn test_rejects_non_matching(name: &str) {
        assert_eq!(ResultFileName::parse(name), None);
    }

    #[test]
    fn test_sibling_keeps_suffix() {
        let result = ResultFileName::new(FileKind::Result, "x");
        let output = result.sibling(FileKind::Output);
        assert_eq!(output.random, result.random);
        assert!(output.to_string().starts_with("suitey_output_x_"));
    }

    #[test]
    fn test_sanitize_suite_id() {
        assert_eq!(sanitize_suite_id("unit tests/core"), "unit-tests-core");
        assert_eq!(sanitize_suite_id("keep_under.score-dash"), "keep_under.score-dash");
        assert_eq!(sanitize_suite_id("  "), "suite");
        assert_eq!(sanitize_suite_id(".."), "suite");
    }
}
