//! Tool Runner: invokes one external transformation tool and structures its output.

pub mod parser;
pub mod runner;

pub use parser::{PatternOutputParser, ToolOutputParser, parse_tool_output};
pub use runner::ToolRunner;

use crate::util::duration_serde;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Structured outcome of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    #[serde(default)]
    pub tool: String,
    pub success: bool,
    pub files_processed: u64,
    pub items_removed: u64,
    pub items_fixed: u64,
    pub items_prefixed: u64,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Tool-reported confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// The exact argument list passed to the tool.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolExecutionResult {
    /// Removed, fixed and prefixed items together.
    pub fn items_changed(&self) -> u64 {
        self.items_removed + self.items_fixed + self.items_prefixed
    }

    /// A failed result carrying one error message.
    pub fn failure(tool: &str, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            errors: vec![message.into()],
            ..Default::default()
        }
    }
}
