//! Lenient extraction of counts and diagnostics from tool output.
//!
//! Recognised lines:
//! - `<N> files processed`
//! - `<N> [unused] variables|items removed|fixed|prefixed`
//! - `safety score: <float>`
//! - lines carrying an error marker (`error:`, `fatal:`, `error TS1234`, `❌`)
//! - lines carrying a warning marker (`warning:`, `warn:`, `⚠`)
//!
//! A missing match yields zero. When a count appears more than once the last one wins, since
//! tools print running totals before their final summary.

use super::ToolExecutionResult;
use crate::util::push_capped;
use regex::Regex;
use std::sync::LazyLock;

/// Default cap on collected warning and error lines per category.
pub const MAX_COLLECTED_LINES: usize = 50;

static FILES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+files?\s+processed").unwrap());

static REMOVED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+(?:[a-z]+\s+)?(?:variables?|items?)\s+removed").unwrap()
});

static FIXED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+(?:[a-z]+\s+)?(?:variables?|items?|issues?)\s+fixed").unwrap()
});

static PREFIXED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+(?:[a-z]+\s+)?(?:variables?|items?)\s+prefixed").unwrap()
});

static SAFETY_SCORE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)safety\s+score:\s*(\d*\.?\d+)").unwrap());

static ERROR_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s\[(])(?:error|fatal)(?:\s*:|!|\])|\berror\s+TS\d+|❌").unwrap()
});

static WARNING_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[\s\[(])(?:warning|warn)(?:\s*:|!|\])|⚠").unwrap());

/// Boundary between raw tool text and structured results.
pub trait ToolOutputParser: Send + Sync {
    fn parse(&self, text: &str) -> ToolExecutionResult;
}

/// Regex-based parser used for every tool by default.
#[derive(Debug, Clone)]
pub struct PatternOutputParser {
    max_lines: usize,
}

impl Default for PatternOutputParser {
    fn default() -> Self {
        Self::new(MAX_COLLECTED_LINES)
    }
}

impl PatternOutputParser {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
        }
    }
}

impl ToolOutputParser for PatternOutputParser {
    fn parse(&self, text: &str) -> ToolExecutionResult {
        let mut result = ToolExecutionResult::default();

        result.files_processed = last_count(&FILES_REGEX, text);
        result.items_removed = last_count(&REMOVED_REGEX, text);
        result.items_fixed = last_count(&FIXED_REGEX, text);
        result.items_prefixed = last_count(&PREFIXED_REGEX, text);
        result.safety_score = SAFETY_SCORE_REGEX
            .captures_iter(text)
            .filter_map(|cap| cap.get(1)?.as_str().parse::<f64>().ok())
            .last()
            .map(|score| score.clamp(0.0, 1.0));

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if ERROR_MARKER_REGEX.is_match(line) {
                push_capped(&mut result.errors, line, self.max_lines);
            } else if WARNING_MARKER_REGEX.is_match(line) {
                push_capped(&mut result.warnings, line, self.max_lines);
            }
        }

        result.success = result.errors.is_empty();
        result
    }
}

fn last_count(regex: &Regex, text: &str) -> u64 {
    regex
        .captures_iter(text)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<u64>().ok())
        .last()
        .unwrap_or(0)
}

/// Parse tool output with the default pattern parser.
pub fn parse_tool_output(text: &str) -> ToolExecutionResult {
    PatternOutputParser::default().parse(text)
}
