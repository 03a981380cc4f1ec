//! Error-fix loop: build, parse errors, analyze each, fix all, verify.
//!
//! ```text
//! Running --pass--> Succeeded
//!    |  \--tooling error / timeout--> Fatal
//!    |fail
//!    v
//! Analyzing --0 errors / unparseable--> Fatal
//!    |
//!    v
//! Fixing --generation or write failure--> Fatal
//!    |
//!    v
//! Verifying --pass--> Succeeded   (tooling error / timeout --> Fatal)
//!    |fail, attempts < max --> Analyzing
//!    |fail, attempts = max --> Exhausted
//! ```
//!
//! Every tool call goes through the registry, so tool failures arrive as
//! result maps and only precondition violations escape as `Err`.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{FatalReason, LoopPhase, ParsedError};
use crate::io::config::FixLoopConfig;
use crate::tools::{
    ActionRequest, Params, ToolContext, ToolError, ToolId, ToolRegistry, error_of, succeeded,
    was_cancelled,
};

/// Input to the loop: which test to repair and, optionally, the failing
/// build output that prompted the repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRequest {
    pub test_file: String,
    pub target_file: Option<String>,
    /// When present the loop starts in `Analyzing` instead of building first.
    pub initial_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: LoopPhase,
    pub to: LoopPhase,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Terminal result of one loop run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    pub phase: LoopPhase,
    /// Completed fix cycles (fix written and re-verified).
    pub attempts: u32,
    /// Latest test source: the revised test once a fix was written.
    pub last_test: Option<String>,
    pub last_errors: Vec<ParsedError>,
    pub fatal: Option<FatalReason>,
    pub message: Option<String>,
    pub transitions: Vec<Transition>,
}

impl RepairOutcome {
    pub fn succeeded(&self) -> bool {
        self.phase == LoopPhase::Succeeded
    }
}

/// Mutable bookkeeping for a single run. Never shared.
struct Progress {
    phase: LoopPhase,
    attempts: u32,
    last_test: Option<String>,
    last_errors: Vec<ParsedError>,
    transitions: Vec<Transition>,
}

impl Progress {
    fn new(start: LoopPhase) -> Self {
        Self {
            phase: start,
            attempts: 0,
            last_test: None,
            last_errors: Vec::new(),
            transitions: Vec::new(),
        }
    }

    fn go(&mut self, to: LoopPhase, note: Option<String>) {
        debug!(from = %self.phase, to = %to, attempt = self.attempts, "fix loop transition");
        self.transitions.push(Transition {
            from: self.phase,
            to,
            attempt: self.attempts,
            note,
        });
        self.phase = to;
    }

    fn finish(mut self, to: LoopPhase, fatal: Option<FatalReason>, message: Option<String>) -> RepairOutcome {
        self.go(to, message.clone());
        RepairOutcome {
            phase: self.phase,
            attempts: self.attempts,
            last_test: self.last_test,
            last_errors: self.last_errors,
            fatal,
            message,
            transitions: self.transitions,
        }
    }

    fn fatal(self, reason: FatalReason, detail: Option<&str>) -> RepairOutcome {
        let message = match detail {
            Some(detail) => format!("{}: {detail}", reason.describe()),
            None => reason.describe().to_string(),
        };
        warn!(reason = ?reason, message = %message, "fix loop fatal");
        self.finish(LoopPhase::Fatal, Some(reason), Some(message))
    }
}

pub struct ErrorFixLoop<'a> {
    registry: &'a ToolRegistry,
    ctx: &'a ToolContext,
    config: &'a FixLoopConfig,
}

impl<'a> ErrorFixLoop<'a> {
    pub fn new(registry: &'a ToolRegistry, ctx: &'a ToolContext, config: &'a FixLoopConfig) -> Self {
        Self {
            registry,
            ctx,
            config,
        }
    }

    fn call(&self, request: ActionRequest) -> Result<Params, ToolError> {
        self.registry.dispatch(&request, self.ctx)
    }

    /// Drive the loop to a terminal phase.
    ///
    /// Runs at most `1 + max_attempts` builds. Returns `Err` only for
    /// precondition violations.
    #[instrument(skip_all, fields(test_file = %request.test_file, max_attempts = self.config.max_attempts))]
    pub fn run(&self, request: &RepairRequest) -> Result<RepairOutcome, ToolError> {
        let start = if request.initial_output.is_some() {
            LoopPhase::Analyzing
        } else {
            LoopPhase::Running
        };
        let mut progress = Progress::new(start);

        let read = self.call(ActionRequest::new(ToolId::ReadFile).with("path", request.test_file.as_str()))?;
        let Some(mut test_code) = text(&read, "content") else {
            return Ok(progress.fatal(FatalReason::MissingTest, error_of(&read)));
        };
        progress.last_test = Some(test_code.clone());

        let source = match &request.target_file {
            Some(target) => {
                let read = self.call(ActionRequest::new(ToolId::ReadFile).with("path", target.as_str()))?;
                text(&read, "content")
            }
            None => None,
        };

        let mut output = request.initial_output.clone().unwrap_or_default();
        let mut analyses: Vec<String> = Vec::new();

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Ok(progress.fatal(FatalReason::Cancelled, None));
            }
            match progress.phase {
                LoopPhase::Running | LoopPhase::Verifying => {
                    let verifying = progress.phase == LoopPhase::Verifying;
                    if verifying {
                        progress.attempts += 1;
                    }
                    let mut build = ActionRequest::new(ToolId::RunBuild)
                        .with("test_file", request.test_file.as_str());
                    if let Some(target) = &request.target_file {
                        build = build.with("target", target.as_str());
                    }
                    let result = self.call(build)?;
                    if !succeeded(&result) {
                        let reason = if was_cancelled(&result) {
                            FatalReason::Cancelled
                        } else {
                            FatalReason::BuildTooling
                        };
                        return Ok(progress.fatal(reason, error_of(&result)));
                    }
                    // A killed build's partial log says nothing about the test.
                    if flag(&result, "timed_out") {
                        return Ok(progress.fatal(FatalReason::BuildTooling, Some("build timed out")));
                    }
                    output = text(&result, "output").unwrap_or_default();
                    if flag(&result, "passed") {
                        info!(attempts = progress.attempts, "test passes");
                        return Ok(progress.finish(LoopPhase::Succeeded, None, None));
                    }
                    if verifying && progress.attempts >= self.config.max_attempts {
                        // Best effort: report the errors of the final build.
                        let parsed = self.call(
                            ActionRequest::new(ToolId::ParseErrors).with("output", output.as_str()),
                        )?;
                        if let Some(errors) = parsed_errors(&parsed) {
                            progress.last_errors = errors;
                        }
                        let message = format!("test still failing after {} attempts", progress.attempts);
                        warn!(attempts = progress.attempts, "fix loop exhausted");
                        return Ok(progress.finish(LoopPhase::Exhausted, None, Some(message)));
                    }
                    progress.go(LoopPhase::Analyzing, None);
                }
                LoopPhase::Analyzing => {
                    let parsed = self.call(
                        ActionRequest::new(ToolId::ParseErrors).with("output", output.as_str()),
                    )?;
                    let Some(errors) = parsed_errors(&parsed) else {
                        let reason = if was_cancelled(&parsed) {
                            FatalReason::Cancelled
                        } else {
                            FatalReason::Unparseable
                        };
                        return Ok(progress.fatal(reason, error_of(&parsed)));
                    };
                    if errors.is_empty() {
                        return Ok(progress.fatal(FatalReason::NoParsedErrors, None));
                    }
                    info!(errors = errors.len(), "analyzing build errors");

                    analyses.clear();
                    for error in errors.iter().take(self.config.max_errors_per_attempt) {
                        let error_json = serde_json::to_value(error).unwrap_or(Value::Null);
                        let mut fix = ActionRequest::new(ToolId::GenerateFix)
                            .with("mode", "analyze")
                            .with("test_path", request.test_file.as_str())
                            .with("test_code", test_code.as_str())
                            .with("error", error_json);
                        if let Some(source) = &source {
                            fix = fix.with("source", source.as_str());
                        }
                        let result = self.call(fix)?;
                        if was_cancelled(&result) {
                            return Ok(progress.fatal(FatalReason::Cancelled, None));
                        }
                        match text(&result, "analysis") {
                            Some(analysis) => analyses.push(analysis),
                            None => warn!(err = ?error_of(&result), "per-error analysis failed"),
                        }
                    }
                    progress.last_errors = errors;
                    progress.go(LoopPhase::Fixing, None);
                }
                LoopPhase::Fixing => {
                    let errors_json =
                        serde_json::to_value(&progress.last_errors).unwrap_or(Value::Null);
                    let mut fix = ActionRequest::new(ToolId::GenerateFix)
                        .with("mode", "comprehensive")
                        .with("test_path", request.test_file.as_str())
                        .with("test_code", test_code.as_str())
                        .with("errors", errors_json)
                        .with("analyses", Value::from(analyses.clone()));
                    if let Some(source) = &source {
                        fix = fix.with("source", source.as_str());
                    }
                    let result = self.call(fix)?;
                    let Some(fixed) = text(&result, "fixed_code") else {
                        let reason = if was_cancelled(&result) {
                            FatalReason::Cancelled
                        } else {
                            FatalReason::FixGeneration
                        };
                        return Ok(progress.fatal(reason, error_of(&result)));
                    };

                    let write = self.call(
                        ActionRequest::new(ToolId::WriteFile)
                            .with("path", request.test_file.as_str())
                            .with("content", fixed.as_str()),
                    )?;
                    if !succeeded(&write) {
                        return Ok(progress.fatal(FatalReason::WriteFailed, error_of(&write)));
                    }
                    test_code = fixed;
                    progress.last_test = Some(test_code.clone());
                    progress.go(LoopPhase::Verifying, None);
                }
                LoopPhase::Succeeded | LoopPhase::Exhausted | LoopPhase::Fatal => {
                    // Terminal phases return directly from the arms above.
                    let phase = progress.phase;
                    return Ok(progress.finish(phase, None, None));
                }
            }
        }
    }
}

fn text(output: &Params, key: &str) -> Option<String> {
    if !succeeded(output) {
        return None;
    }
    output.get(key).and_then(Value::as_str).map(str::to_string)
}

fn flag(output: &Params, key: &str) -> bool {
    output.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn parsed_errors(output: &Params) -> Option<Vec<ParsedError>> {
    if !succeeded(output) {
        return None;
    }
    serde_json::from_value(output.get("errors")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::types::ErrorType;
    use crate::test_support::{ScriptedErrorParser, TestWorkspace};

    const TEST: &str = "src/test/kotlin/FooTest.kt";

    fn run(ws: &TestWorkspace) -> RepairOutcome {
        let registry = ws.registry();
        let ctx = ToolContext::from_config(&ws.config.tools, crate::cancel::CancelToken::new());
        ErrorFixLoop::new(&registry, &ctx, &ws.config.fix_loop)
            .run(&RepairRequest {
                test_file: TEST.to_string(),
                target_file: None,
                initial_output: None,
            })
            .expect("no precondition errors")
    }

    #[test]
    fn build_tooling_failure_is_fatal() {
        let ws = TestWorkspace::new();
        ws.write(TEST, "class FooTest");
        ws.build.push_error("gradlew: not found");

        let outcome = run(&ws);
        assert_eq!(outcome.phase, LoopPhase::Fatal);
        assert_eq!(outcome.fatal, Some(FatalReason::BuildTooling));
        assert!(
            outcome
                .message
                .as_deref()
                .is_some_and(|m| m.contains("gradlew: not found"))
        );
        assert_eq!(outcome.last_test.as_deref(), Some("class FooTest"));
    }

    #[test]
    fn timed_out_build_stops_before_any_fix() {
        let mut ws = TestWorkspace::new();
        ws.config.build.timeout_secs = 42;
        ws.write(TEST, "class FooTest");
        ws.build.push_timeout("e: FooTest.kt:1:1 Unresolved reference: Foo");

        let outcome = run(&ws);
        assert_eq!(outcome.fatal, Some(FatalReason::BuildTooling));
        assert!(
            outcome
                .message
                .as_deref()
                .is_some_and(|m| m.contains("timed out"))
        );
        assert_eq!(outcome.attempts, 0);
        assert_eq!(ws.build.timeouts(), vec![std::time::Duration::from_secs(42)]);
        assert!(ws.llm.prompts().is_empty());
        assert_eq!(ws.read(TEST), "class FooTest");
    }

    #[test]
    fn failed_comprehensive_fix_is_fatal_but_analysis_failures_are_skipped() {
        let parser = Arc::new(ScriptedErrorParser::new());
        parser.push(vec![
            ParsedError::new(ErrorType::Compilation, "first"),
            ParsedError::new(ErrorType::Compilation, "second"),
        ]);
        let mut ws = TestWorkspace::new().with_error_parser(parser);
        ws.config.tools.llm_retries = 0;
        ws.write(TEST, "class FooTest");
        ws.build.push_fail("e: first\ne: second");
        ws.llm
            .push_error(crate::io::llm::LlmError::Unusable("garbled".to_string()))
            .push_reply("second looks like a typo");

        let outcome = run(&ws);
        assert_eq!(outcome.fatal, Some(FatalReason::FixGeneration));
        assert_eq!(outcome.last_errors.len(), 2);
        // Two analyses attempted, then the comprehensive fix found the script empty.
        assert_eq!(ws.llm.prompts().len(), 3);
        assert_eq!(ws.read(TEST), "class FooTest");
    }

    #[test]
    fn analysis_is_bounded_per_attempt() {
        let parser = Arc::new(ScriptedErrorParser::new());
        parser.push(
            (0..4)
                .map(|i| ParsedError::new(ErrorType::Compilation, format!("error {i}")))
                .collect(),
        );
        let mut ws = TestWorkspace::new().with_error_parser(parser);
        ws.config.fix_loop.max_errors_per_attempt = 2;
        ws.write(TEST, "class FooTest");
        ws.build.push_fail("e: many").push_pass("ok");
        ws.llm
            .push_reply("a0")
            .push_reply("a1")
            .push_reply("```\nclass FooTest { fixed }\n```");

        let outcome = run(&ws);
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(ws.llm.prompts().len(), 3);
        assert!(ws.llm.prompts()[2].contains("error 3"));
    }
}
