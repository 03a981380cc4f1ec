//! Error-parsing capability and its default regex implementation.
//!
//! The regex parser targets Kotlin/Java builds run through Gradle with
//! JUnit 5 and MockK. It works line by line so a single build log yields one
//! [`ParsedError`] per failure, in log order.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use tracing::{debug, instrument};

use crate::core::types::{ErrorType, ParsedError};

pub trait ErrorParser: Send + Sync {
    /// Turn raw build output into structured errors, in output order.
    /// A passing build yields an empty list.
    fn parse(&self, raw_output: &str) -> Result<Vec<ParsedError>>;
}

type Extract = fn(&Captures<'_>) -> Vec<String>;
type Message = fn(&Captures<'_>) -> String;

struct Rule {
    regex: Regex,
    error_type: ErrorType,
    category: &'static str,
    suggested_fix: &'static str,
    symbols: Extract,
    message: Message,
}

pub struct RegexErrorParser {
    rules: Vec<Rule>,
    location: Regex,
    symbol_hint: Regex,
    task_failure: Regex,
}

fn whole(caps: &Captures<'_>) -> String {
    caps.get(0).map(|m| m.as_str().trim().to_string()).unwrap_or_default()
}

fn group(caps: &Captures<'_>, i: usize) -> String {
    caps.get(i).map(|m| m.as_str().trim().to_string()).unwrap_or_default()
}

fn no_symbols(_: &Captures<'_>) -> Vec<String> {
    Vec::new()
}

impl RegexErrorParser {
    pub fn new() -> Result<Self> {
        let rule = |pattern: &str,
                    error_type: ErrorType,
                    category: &'static str,
                    suggested_fix: &'static str,
                    symbols: Extract,
                    message: Message|
         -> Result<Rule> {
            Ok(Rule {
                regex: Regex::new(pattern).with_context(|| format!("compile {pattern}"))?,
                error_type,
                category,
                suggested_fix,
                symbols,
                message,
            })
        };

        // Order matters: the first rule matching a line wins.
        let rules = vec![
            rule(
                r"Unresolved reference:?\s*'?([A-Za-z0-9_]+)'?",
                ErrorType::Compilation,
                "UnresolvedReference",
                "Add missing import or define the referenced symbol",
                |c| vec![group(c, 1)],
                whole,
            )?,
            rule(
                r"Type mismatch: inferred type is ([A-Za-z0-9_.<>?, ]+?) but ([A-Za-z0-9_.<>?, ]+?) was expected",
                ErrorType::Compilation,
                "TypeMismatch",
                "Fix the type mismatch by using the correct type or adding a type conversion",
                |c| vec![group(c, 1), group(c, 2)],
                whole,
            )?,
            rule(
                r"Cannot access '([A-Za-z0-9_]+)'(?::| which is a private name in package '([A-Za-z0-9_.]+)')",
                ErrorType::Compilation,
                "MissingDependency",
                "Add the correct import or use a public API",
                |c| match c.get(2) {
                    Some(pkg) => vec![format!("{}.{}", pkg.as_str(), group(c, 1))],
                    None => vec![group(c, 1)],
                },
                whole,
            )?,
            rule(
                r"error: cannot find symbol",
                ErrorType::Compilation,
                "UnresolvedReference",
                "Add missing import or define the referenced symbol",
                no_symbols,
                |_| "cannot find symbol".to_string(),
            )?,
            rule(
                r"io\.mockk\.MockKException:\s*(.*)",
                ErrorType::TestFailure,
                "MockkVerificationFailure",
                "Fix the mock setup or verification",
                no_symbols,
                |c| group(c, 1),
            )?,
            rule(
                r"(?:org\.opentest4j\.AssertionFailedError|java\.lang\.AssertionError|org\.junit\.ComparisonFailure):\s*(.*)",
                ErrorType::TestFailure,
                "AssertionFailure",
                "Fix the assertion or the code being tested",
                no_symbols,
                |c| group(c, 1),
            )?,
            rule(
                r"java\.lang\.NullPointerException:?\s*(.*)",
                ErrorType::Runtime,
                "NullPointerException",
                "Add null checks or initialize the variable properly",
                no_symbols,
                |c| {
                    let detail = group(c, 1);
                    if detail.is_empty() {
                        "Null pointer exception".to_string()
                    } else {
                        detail
                    }
                },
            )?,
            rule(
                r"\b((?:[a-z][A-Za-z0-9_]*\.)+[A-Z][A-Za-z0-9_]*(?:Exception|Error)):\s*(.*)",
                ErrorType::Runtime,
                "RuntimeException",
                "Handle or prevent the exception in the test setup",
                |c| vec![group(c, 1)],
                |c| format!("{}: {}", group(c, 1), group(c, 2)),
            )?,
            rule(
                r"^\s*(?:e|error|ERROR):\s*(.+)",
                ErrorType::Compilation,
                "Other",
                "Fix the compilation error in the test file",
                no_symbols,
                |c| group(c, 1),
            )?,
        ];

        Ok(Self {
            rules,
            location: Regex::new(
                r"(?:file://)?([A-Za-z0-9_/\\.\-]+\.(?:kt|kts|java|py|ts|rs))(?::(\d+)|: \((\d+), ?\d+\))",
            )
            .context("compile location regex")?,
            symbol_hint: Regex::new(r"^\s*symbol:\s+(?:\w+\s+)?([A-Za-z0-9_]+)")
                .context("compile symbol regex")?,
            task_failure: Regex::new(r"Execution failed for task '([^']+)'")
                .context("compile task regex")?,
        })
    }

    fn locate(&self, line: &str, error: &mut ParsedError) {
        if let Some(caps) = self.location.captures(line) {
            error.file_path = caps.get(1).map(|m| m.as_str().to_string());
            error.line_number = caps
                .get(2)
                .or_else(|| caps.get(3))
                .and_then(|m| m.as_str().parse().ok());
        }
    }

    /// Strip a leading `path:line[:col]` location from a compiler message.
    fn strip_location(&self, message: &str) -> String {
        match self.location.find(message) {
            Some(m) if m.start() == 0 => message[m.end()..]
                .trim_start_matches(|c: char| c == ':' || c.is_ascii_digit() || c == ' ')
                .to_string(),
            _ => message.to_string(),
        }
    }
}

impl ErrorParser for RegexErrorParser {
    #[instrument(skip_all, fields(output_bytes = raw_output.len()))]
    fn parse(&self, raw_output: &str) -> Result<Vec<ParsedError>> {
        if raw_output.trim().is_empty() {
            return Ok(Vec::new());
        }
        if raw_output.contains("BUILD SUCCESSFUL") && !raw_output.contains("BUILD FAILED") {
            debug!("build output reports success");
            return Ok(Vec::new());
        }

        let lines: Vec<&str> = raw_output.lines().collect();
        let mut errors: Vec<ParsedError> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let Some((rule, caps)) = self
                .rules
                .iter()
                .find_map(|rule| rule.regex.captures(line).map(|caps| (rule, caps)))
            else {
                continue;
            };
            let mut message = (rule.message)(&caps);
            if rule.category == "Other" {
                message = self.strip_location(&message);
            }
            let mut error = ParsedError::new(rule.error_type, message);
            error.error_category = rule.category.to_string();
            error.suggested_fix = rule.suggested_fix.to_string();
            error.involved_symbols = (rule.symbols)(&caps)
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect();
            if error.involved_symbols.is_empty()
                && let Some(hint) = lines
                    .get(idx + 1)
                    .and_then(|next| self.symbol_hint.captures(next))
            {
                error.involved_symbols.push(group(&hint, 1));
            }
            self.locate(line, &mut error);
            if !errors.contains(&error) {
                errors.push(error);
            }
        }

        if errors.is_empty()
            && let Some(caps) = self.task_failure.captures(raw_output)
        {
            let mut error = ParsedError::new(
                ErrorType::BuildFailure,
                format!("Execution failed for task '{}'", group(&caps, 1)),
            );
            error.error_category = "TaskFailure".to_string();
            error.suggested_fix = "Review the build output for the failing task".to_string();
            errors.push(error);
        }

        debug!(errors = errors.len(), "parsed build output");
        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> RegexErrorParser {
        RegexErrorParser::new().expect("parser")
    }

    #[test]
    fn successful_build_yields_no_errors() {
        let errors = parser()
            .parse("> Task :test\nBUILD SUCCESSFUL in 3s")
            .expect("parse");
        assert!(errors.is_empty());
    }

    #[test]
    fn unrecognized_failure_yields_no_errors() {
        let errors = parser().parse("something odd happened").expect("parse");
        assert!(errors.is_empty());
    }

    #[test]
    fn parses_kotlin_compiler_errors_in_order() {
        let log = "\
e: file:///repo/src/test/kotlin/com/acme/FooTest.kt:12:5 Unresolved reference: bar
e: file:///repo/src/test/kotlin/com/acme/FooTest.kt:20:9 Type mismatch: inferred type is String but Int was expected
BUILD FAILED in 2s";
        let errors = parser().parse(log).expect("parse");
        assert_eq!(errors.len(), 2);

        assert_eq!(errors[0].error_type, ErrorType::Compilation);
        assert_eq!(errors[0].error_category, "UnresolvedReference");
        assert_eq!(errors[0].involved_symbols, vec!["bar"]);
        assert_eq!(
            errors[0].file_path.as_deref(),
            Some("/repo/src/test/kotlin/com/acme/FooTest.kt")
        );
        assert_eq!(errors[0].line_number, Some(12));

        assert_eq!(errors[1].error_category, "TypeMismatch");
        assert_eq!(errors[1].involved_symbols, vec!["String", "Int"]);
        assert_eq!(errors[1].line_number, Some(20));
    }

    #[test]
    fn parses_java_missing_symbol_with_hint() {
        let log = "\
/repo/src/test/java/FooTest.java:7: error: cannot find symbol
    symbol:   class Foo
BUILD FAILED";
        let errors = parser().parse(log).expect("parse");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "cannot find symbol");
        assert_eq!(errors[0].involved_symbols, vec!["Foo"]);
        assert_eq!(errors[0].line_number, Some(7));
    }

    #[test]
    fn parses_test_failures() {
        let log = "\
FooTest > computes total() FAILED
    org.opentest4j.AssertionFailedError: expected: <3> but was: <2>
    io.mockk.MockKException: no answer found for: Repo(#1).load(1)
    java.lang.NullPointerException
BUILD FAILED";
        let errors = parser().parse(log).expect("parse");
        let categories: Vec<&str> = errors.iter().map(|e| e.error_category.as_str()).collect();
        assert_eq!(
            categories,
            vec!["AssertionFailure", "MockkVerificationFailure", "NullPointerException"]
        );
        assert_eq!(errors[0].error_type, ErrorType::TestFailure);
        assert_eq!(errors[0].message, "expected: <3> but was: <2>");
        assert_eq!(errors[2].error_type, ErrorType::Runtime);
        assert_eq!(errors[2].message, "Null pointer exception");
    }

    #[test]
    fn generic_compiler_line_strips_location() {
        let errors = parser()
            .parse("e: /repo/FooTest.kt:3:1 Expecting member declaration")
            .expect("parse");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_category, "Other");
        assert_eq!(errors[0].message, "Expecting member declaration");
    }

    #[test]
    fn task_failure_is_fallback_only() {
        let errors = parser()
            .parse("* What went wrong:\nExecution failed for task ':app:test'.\nBUILD FAILED")
            .expect("parse");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::BuildFailure);
    }

    #[test]
    fn duplicate_lines_collapse() {
        let log = "e: /r/A.kt:1:1 Unresolved reference: x\ne: /r/A.kt:1:1 Unresolved reference: x";
        assert_eq!(parser().parse(log).expect("parse").len(), 1);
    }
}
