//! Tool contract and registry.
//!
//! A tool wraps one external operation behind `run(params) -> params`.
//! [`ToolRegistry::dispatch`] validates parameters before running and
//! converts every runtime failure into `{success: false, error}` so a failing
//! tool never aborts the step that invoked it. Only [`ToolError`] (a caller
//! precondition violation) leaves the registry as an `Err`.

pub mod analysis;
pub mod build;
pub mod files;
pub mod index;
pub mod llm;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cancel::{CancelToken, Cancelled};
use crate::io::Capabilities;
use crate::io::config::{LoopConfig, ToolsConfig};
use crate::io::llm::LlmError;

/// Tool parameters and results.
pub type Params = Map<String, Value>;

/// The closed set of tools a step may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    IndexRepository,
    ParseCode,
    ResolveDependencies,
    FindSimilar,
    GenerateTest,
    GenerateFix,
    ReadFile,
    WriteFile,
    RunBuild,
    ParseErrors,
}

impl ToolId {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::IndexRepository => "index_repository",
            ToolId::ParseCode => "parse_code",
            ToolId::ResolveDependencies => "resolve_dependencies",
            ToolId::FindSimilar => "find_similar",
            ToolId::GenerateTest => "generate_test",
            ToolId::GenerateFix => "generate_fix",
            ToolId::ReadFile => "read_file",
            ToolId::WriteFile => "write_file",
            ToolId::RunBuild => "run_build",
            ToolId::ParseErrors => "parse_errors",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-side precondition violations, reported before a tool runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("{tool}: missing required parameter `{key}`")]
    MissingParameter { tool: ToolId, key: &'static str },
    #[error("{tool}: invalid parameter `{key}`: {reason}")]
    InvalidParameter {
        tool: ToolId,
        key: &'static str,
        reason: String,
    },
    #[error("{0}: no such tool registered")]
    Unavailable(ToolId),
}

/// A step's request to run one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub tool: ToolId,
    pub params: Params,
}

impl ActionRequest {
    pub fn new(tool: ToolId) -> Self {
        Self {
            tool,
            params: Params::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Retry schedule for LLM service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base: Duration,
    pub max: Duration,
}

/// Per-call execution settings shared by every tool in a run.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub cancel: CancelToken,
}

impl ToolContext {
    pub fn from_config(config: &ToolsConfig, cancel: CancelToken) -> Self {
        Self {
            timeout: config.timeout(),
            retry: RetryPolicy {
                retries: config.llm_retries,
                base: Duration::from_millis(config.backoff_base_ms),
                max: Duration::from_millis(config.backoff_max_ms),
            },
            cancel,
        }
    }
}

pub trait Tool: Send + Sync {
    fn id(&self) -> ToolId;

    /// Keys that must be present and non-null.
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn validate(&self, params: &Params) -> Result<(), ToolError> {
        require_present(self.id(), self.required_params(), params)
    }

    /// Perform the operation. Errors are converted at the registry boundary.
    fn run(&self, params: &Params, ctx: &ToolContext) -> anyhow::Result<Params>;
}

/// Tools keyed by id, built once per process.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolId, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every canonical tool over the given capabilities.
    pub fn standard(caps: &Capabilities, config: &LoopConfig) -> Self {
        let mut registry = Self::new();
        registry.register(index::IndexRepository::new(caps, &config.index));
        registry.register(index::FindSimilar::new(caps));
        registry.register(analysis::ParseCode::new(caps));
        registry.register(analysis::ResolveDependencies::new(caps));
        registry.register(llm::GenerateTest::new(caps, &config.generation));
        registry.register(llm::GenerateFix::new(caps, &config.generation));
        registry.register(files::ReadFile::new(caps));
        registry.register(files::WriteFile::new(caps));
        registry.register(build::RunBuild::new(caps, &config.build));
        registry.register(build::ParseErrors::new(caps));
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.id(), Box::new(tool));
    }

    pub fn contains(&self, id: ToolId) -> bool {
        self.tools.contains_key(&id)
    }

    /// Validate and run one request.
    ///
    /// The returned map always carries `success`. Runtime failures become
    /// `{success: false, error}`; cancellation additionally sets
    /// `cancelled: true`.
    #[instrument(skip_all, fields(tool = %request.tool))]
    pub fn dispatch(&self, request: &ActionRequest, ctx: &ToolContext) -> Result<Params, ToolError> {
        let tool = self
            .tools
            .get(&request.tool)
            .ok_or(ToolError::Unavailable(request.tool))?;
        tool.validate(&request.params)?;

        if ctx.cancel.is_cancelled() {
            return Ok(failure("cancelled", true));
        }
        match tool.run(&request.params, ctx) {
            Ok(mut output) => {
                output
                    .entry("success".to_string())
                    .or_insert(Value::Bool(true));
                debug!("tool completed");
                Ok(output)
            }
            Err(err) => {
                let cancelled = is_cancellation(&err);
                warn!(err = %format!("{err:#}"), cancelled, "tool failed");
                Ok(failure(&format!("{err:#}"), cancelled))
            }
        }
    }
}

fn failure(message: &str, cancelled: bool) -> Params {
    let mut out = Params::new();
    out.insert("success".to_string(), Value::Bool(false));
    out.insert("error".to_string(), Value::String(message.to_string()));
    if cancelled {
        out.insert("cancelled".to_string(), Value::Bool(true));
    }
    out
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.is::<Cancelled>() || matches!(cause.downcast_ref::<LlmError>(), Some(LlmError::Cancelled))
    })
}

/// `true` when a tool result reports success.
pub fn succeeded(output: &Params) -> bool {
    output.get("success").and_then(Value::as_bool).unwrap_or(false)
}

/// `true` when a tool result reports cancellation.
pub fn was_cancelled(output: &Params) -> bool {
    output.get("cancelled").and_then(Value::as_bool).unwrap_or(false)
}

pub fn error_of(output: &Params) -> Option<&str> {
    output.get("error").and_then(Value::as_str)
}

pub(crate) fn require_present(
    tool: ToolId,
    keys: &'static [&'static str],
    params: &Params,
) -> Result<(), ToolError> {
    for &key in keys {
        if params.get(key).is_none_or(Value::is_null) {
            return Err(ToolError::MissingParameter { tool, key });
        }
    }
    Ok(())
}

pub(crate) fn require_string(tool: ToolId, key: &'static str, params: &Params) -> Result<(), ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Err(ToolError::MissingParameter { tool, key }),
        Some(Value::String(_)) => Ok(()),
        Some(other) => Err(ToolError::InvalidParameter {
            tool,
            key,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

pub(crate) fn str_param<'a>(params: &'a Params, key: &str) -> anyhow::Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("parameter `{key}` must be a string"))
}

pub(crate) fn opt_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Echo;

    impl Tool for Echo {
        fn id(&self) -> ToolId {
            ToolId::ReadFile
        }
        fn required_params(&self) -> &'static [&'static str] {
            &["path"]
        }
        fn run(&self, params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
            let path = str_param(params, "path")?;
            if path == "boom" {
                bail!("exploded");
            }
            if path == "stop" {
                return Err(Cancelled.into());
            }
            let mut out = Params::new();
            out.insert("echo".to_string(), Value::String(path.to_string()));
            Ok(out)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::from_config(&ToolsConfig::default(), CancelToken::new())
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry
    }

    #[test]
    fn missing_parameter_is_precondition_error() {
        let err = registry()
            .dispatch(&ActionRequest::new(ToolId::ReadFile), &ctx())
            .expect_err("precondition");
        assert_eq!(
            err,
            ToolError::MissingParameter {
                tool: ToolId::ReadFile,
                key: "path"
            }
        );
        let err = registry()
            .dispatch(&ActionRequest::new(ToolId::ReadFile).with("path", Value::Null), &ctx())
            .expect_err("null counts as missing");
        assert!(matches!(err, ToolError::MissingParameter { .. }));
    }

    #[test]
    fn success_flag_is_added() {
        let out = registry()
            .dispatch(&ActionRequest::new(ToolId::ReadFile).with("path", "a"), &ctx())
            .expect("dispatch");
        assert!(succeeded(&out));
        assert_eq!(out["echo"], "a");
    }

    #[test]
    fn runtime_failure_becomes_result() {
        let out = registry()
            .dispatch(&ActionRequest::new(ToolId::ReadFile).with("path", "boom"), &ctx())
            .expect("dispatch");
        assert!(!succeeded(&out));
        assert_eq!(error_of(&out), Some("exploded"));
        assert!(!was_cancelled(&out));
    }

    #[test]
    fn cancellation_is_marked() {
        let out = registry()
            .dispatch(&ActionRequest::new(ToolId::ReadFile).with("path", "stop"), &ctx())
            .expect("dispatch");
        assert!(was_cancelled(&out));

        let ctx = ctx();
        ctx.cancel.cancel();
        let out = registry()
            .dispatch(&ActionRequest::new(ToolId::ReadFile).with("path", "a"), &ctx)
            .expect("dispatch");
        assert!(!succeeded(&out));
        assert!(was_cancelled(&out));
    }

    #[test]
    fn unregistered_tool_is_unavailable() {
        let err = registry()
            .dispatch(&ActionRequest::new(ToolId::RunBuild), &ctx())
            .expect_err("unavailable");
        assert_eq!(err, ToolError::Unavailable(ToolId::RunBuild));
    }
}
