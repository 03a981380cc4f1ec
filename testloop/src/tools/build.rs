//! RunBuild and ParseErrors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tracing::info;

use super::{Params, Tool, ToolContext, ToolId, opt_str, str_param};
use crate::cancel::Cancelled;
use crate::io::Capabilities;
use crate::io::build::{BuildRunner, BuildTarget};
use crate::io::config::BuildConfig;
use crate::io::error_parser::ErrorParser;

/// Runs the project's build+test command for one test file.
///
/// A failing build is a successful tool call with `passed: false`; only a
/// build that could not run at all is a tool failure.
pub struct RunBuild {
    runner: Arc<dyn BuildRunner>,
    timeout: Duration,
}

impl RunBuild {
    pub fn new(caps: &Capabilities, config: &BuildConfig) -> Self {
        Self {
            runner: Arc::clone(&caps.build),
            timeout: config.timeout(),
        }
    }
}

impl Tool for RunBuild {
    fn id(&self) -> ToolId {
        ToolId::RunBuild
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["test_file"]
    }

    fn run(&self, params: &Params, ctx: &ToolContext) -> anyhow::Result<Params> {
        let target = BuildTarget {
            test_file: str_param(params, "test_file")?.to_string(),
            target: opt_str(params, "target").map(str::to_string),
        };
        let output = self.runner.run(&target, self.timeout, &ctx.cancel)?;
        if output.cancelled {
            return Err(Cancelled.into());
        }
        info!(passed = output.passed, timed_out = output.timed_out, "build finished");
        let mut out = Params::new();
        out.insert("output".to_string(), Value::String(output.output));
        out.insert("passed".to_string(), Value::Bool(output.passed));
        out.insert("timed_out".to_string(), Value::Bool(output.timed_out));
        Ok(out)
    }
}

/// Adapts the error-parsing capability: raw output in, `errors` array out.
pub struct ParseErrors {
    parser: Arc<dyn ErrorParser>,
}

impl ParseErrors {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            parser: Arc::clone(&caps.error_parser),
        }
    }
}

impl Tool for ParseErrors {
    fn id(&self) -> ToolId {
        ToolId::ParseErrors
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["output"]
    }

    fn run(&self, params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
        let raw = str_param(params, "output")?;
        let errors = self.parser.parse(raw).context("parse build output")?;
        let mut out = Params::new();
        out.insert("count".to_string(), Value::from(errors.len()));
        out.insert(
            "errors".to_string(),
            serde_json::to_value(&errors).context("serialize parsed errors")?,
        );
        Ok(out)
    }
}
