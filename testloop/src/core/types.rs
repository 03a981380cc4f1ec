//! Shared deterministic types for the agent loop.
//!
//! These types define stable contracts between steps, tools, and the
//! error-fix loop. They carry no I/O and serialize to stable JSON so they can
//! be stored in state artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed set of step kinds a goal can be composed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    Index,
    Analyze,
    Generate,
    Fix,
}

impl StepName {
    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Index => "index",
            StepName::Analyze => "analyze",
            StepName::Generate => "generate",
            StepName::Fix => "fix",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a build/test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    Compilation,
    TestFailure,
    Runtime,
    BuildFailure,
}

/// One build/test failure extracted from raw tool output.
///
/// Created by the error-parsing capability and consumed read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedError {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
    pub message: String,
    pub error_type: ErrorType,
    /// Free-form specific classification (e.g. `UnresolvedReference`).
    #[serde(default)]
    pub error_category: String,
    #[serde(default)]
    pub involved_symbols: Vec<String>,
    #[serde(default)]
    pub suggested_fix: String,
}

impl ParsedError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            file_path: None,
            line_number: None,
            message: message.into(),
            error_type,
            error_category: String::new(),
            involved_symbols: Vec::new(),
            suggested_fix: String::new(),
        }
    }

    /// One-line `path:line: message` rendering for prompts and logs.
    pub fn summary(&self) -> String {
        match (&self.file_path, self.line_number) {
            (Some(path), Some(line)) => format!("{path}:{line}: {}", self.message),
            (Some(path), None) => format!("{path}: {}", self.message),
            _ => self.message.clone(),
        }
    }
}

/// Phases of the error-fix loop. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    Running,
    Analyzing,
    Fixing,
    Verifying,
    Succeeded,
    Exhausted,
    Fatal,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopPhase::Succeeded | LoopPhase::Exhausted | LoopPhase::Fatal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoopPhase::Running => "running",
            LoopPhase::Analyzing => "analyzing",
            LoopPhase::Fixing => "fixing",
            LoopPhase::Verifying => "verifying",
            LoopPhase::Succeeded => "succeeded",
            LoopPhase::Exhausted => "exhausted",
            LoopPhase::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the error-fix loop could not continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    /// The test file could not be read.
    MissingTest,
    /// The build/test command itself failed to run.
    BuildTooling,
    /// The error parser failed on the build output.
    Unparseable,
    /// The build failed but the parser reported no errors.
    NoParsedErrors,
    /// The comprehensive fix could not be generated.
    FixGeneration,
    /// The corrected test could not be written.
    WriteFailed,
    /// The run was asked to stop.
    Cancelled,
}

impl FatalReason {
    pub fn describe(self) -> &'static str {
        match self {
            FatalReason::MissingTest => "test file could not be read",
            FatalReason::BuildTooling => "build tooling failed",
            FatalReason::Unparseable => "build output could not be parsed",
            FatalReason::NoParsedErrors => "build failed but no errors were parsed",
            FatalReason::FixGeneration => "fix generation failed",
            FatalReason::WriteFailed => "corrected test could not be written",
            FatalReason::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_error_serializes_with_stable_names() {
        let mut err = ParsedError::new(ErrorType::Compilation, "cannot find symbol Foo");
        err.involved_symbols.push("Foo".to_string());
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["error_type"], "Compilation");
        assert_eq!(json["involved_symbols"][0], "Foo");
        assert!(json["file_path"].is_null());
    }

    #[test]
    fn parsed_error_deserializes_with_missing_optional_fields() {
        let err: ParsedError =
            serde_json::from_str(r#"{"message":"boom","error_type":"Runtime"}"#).expect("parse");
        assert_eq!(err.error_type, ErrorType::Runtime);
        assert!(err.involved_symbols.is_empty());
        assert_eq!(err.summary(), "boom");
    }

    #[test]
    fn terminal_phases() {
        assert!(LoopPhase::Succeeded.is_terminal());
        assert!(LoopPhase::Exhausted.is_terminal());
        assert!(LoopPhase::Fatal.is_terminal());
        assert!(!LoopPhase::Verifying.is_terminal());
    }
}
