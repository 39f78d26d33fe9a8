//! Heuristic safety scoring of a single automated replacement.
//!
//! The score starts from a base value keyed on the replacement kind, then named context
//! adjustments apply in a fixed order. The function is pure: identical inputs always give an
//! identical score.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Score reduction inside try/catch or promise-rejection handling.
pub const ERROR_HANDLING_PENALTY: f64 = 0.2;
/// Score bonus for replacements inside test files.
pub const TEST_FILE_BONUS: f64 = 0.1;
/// Ceiling for replacements that touch a function parameter type.
pub const FUNCTION_PARAMETER_CEILING: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplacementKind {
    ArrayType,
    RecordType,
    UnusedVariable,
    UnusedImport,
    ConsoleStatement,
    VariableDeclaration,
    ReturnType,
    TypeAssertion,
    Other,
}

impl ReplacementKind {
    pub fn base_score(self) -> f64 {
        match self {
            ReplacementKind::ConsoleStatement => 0.95,
            ReplacementKind::ArrayType => 0.9,
            ReplacementKind::RecordType => 0.85,
            ReplacementKind::UnusedVariable => 0.85,
            ReplacementKind::UnusedImport => 0.8,
            ReplacementKind::VariableDeclaration => 0.8,
            ReplacementKind::ReturnType => 0.75,
            ReplacementKind::TypeAssertion => 0.7,
            ReplacementKind::Other => 0.6,
        }
    }
}

impl std::str::FromStr for ReplacementKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "array-type" | "array" => Ok(ReplacementKind::ArrayType),
            "record-type" | "record" => Ok(ReplacementKind::RecordType),
            "unused-variable" => Ok(ReplacementKind::UnusedVariable),
            "unused-import" => Ok(ReplacementKind::UnusedImport),
            "console-statement" | "console" => Ok(ReplacementKind::ConsoleStatement),
            "variable-declaration" => Ok(ReplacementKind::VariableDeclaration),
            "return-type" => Ok(ReplacementKind::ReturnType),
            "type-assertion" => Ok(ReplacementKind::TypeAssertion),
            "other" => Ok(ReplacementKind::Other),
            _ => anyhow::bail!(
                "Unknown replacement kind '{}'. Valid: array-type, record-type, unused-variable, \
                 unused-import, console-statement, variable-declaration, return-type, \
                 type-assertion, other",
                s
            ),
        }
    }
}

/// A proposed or applied change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    pub kind: ReplacementKind,
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub replacement: String,
}

impl Replacement {
    pub fn new(kind: ReplacementKind) -> Self {
        Self {
            kind,
            original: String::new(),
            replacement: String::new(),
        }
    }
}

/// Where a replacement happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplacementContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub in_test_file: bool,
    #[serde(default)]
    pub in_error_handling: bool,
    #[serde(default)]
    pub uses_external_api: bool,
    #[serde(default)]
    pub is_function_parameter: bool,
}

static TEST_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[/\\])(?:__tests__|tests?)[/\\]|\.(?:test|spec)\.[cm]?[jt]sx?$").unwrap()
});

static ERROR_HANDLING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btry\s*\{|\bcatch\s*[({]|\.catch\s*\(|\bthrow\s").unwrap());

static EXTERNAL_API_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfetch\s*\(|\baxios\b|XMLHttpRequest|https?://|\bapi(?:Client)?\.").unwrap()
});

static FUNCTION_PARAMETER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\b\w+\??\s*:\s*any\b[^()]*\)").unwrap());

impl ReplacementContext {
    /// Detect context flags from a file path and the code around the replacement.
    pub fn infer(path: &Path, surrounding_code: &str) -> Self {
        let path_text = path.to_string_lossy();
        Self {
            file_path: Some(path.to_path_buf()),
            in_test_file: TEST_PATH_REGEX.is_match(&path_text),
            in_error_handling: ERROR_HANDLING_REGEX.is_match(surrounding_code),
            uses_external_api: EXTERNAL_API_REGEX.is_match(surrounding_code),
            is_function_parameter: FUNCTION_PARAMETER_REGEX.is_match(surrounding_code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyScore {
    pub is_valid: bool,
    pub safety_score: f64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Score `replacement` in `context` against `minimum_safety_score`.
pub fn calculate_safety_score(
    replacement: &Replacement,
    context: &ReplacementContext,
    minimum_safety_score: f64,
) -> SafetyScore {
    let mut score = replacement.kind.base_score();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    if context.in_error_handling {
        score -= ERROR_HANDLING_PENALTY;
        warnings.push("Replacement is inside error-handling code".to_string());
        recommendations.push("Verify error paths still type-check and behave the same".to_string());
    }
    if context.in_test_file {
        score += TEST_FILE_BONUS;
    }
    if context.uses_external_api {
        warnings.push("Replacement touches data from an external API".to_string());
        recommendations
            .push("Introduce a typed interface for the API response before narrowing".to_string());
    }
    if context.is_function_parameter {
        if score > FUNCTION_PARAMETER_CEILING {
            score = FUNCTION_PARAMETER_CEILING;
        }
        warnings.push("Replacement changes a function parameter type".to_string());
        recommendations.push("Check every call site of the function".to_string());
    }

    let score = round3(score.clamp(0.0, 1.0));
    let is_valid = score >= minimum_safety_score;
    if !is_valid {
        recommendations.push(format!(
            "Score {:.2} is below the minimum {:.2}: apply this change manually",
            score, minimum_safety_score
        ));
    }

    SafetyScore {
        is_valid,
        safety_score: score,
        warnings,
        recommendations,
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
