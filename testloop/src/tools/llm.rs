//! LLM-backed tools: GenerateTest and GenerateFix.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    Params, Tool, ToolContext, ToolError, ToolId, opt_str, require_present, require_string,
    str_param,
};
use crate::cancel::Cancelled;
use crate::core::budget::backoff_delay;
use crate::core::code_block::extract_code;
use crate::core::types::ParsedError;
use crate::io::Capabilities;
use crate::io::config::GenerationConfig;
use crate::io::llm::{LlmClient, LlmError};
use crate::io::prompt::{
    DependencyContext, ExampleContext, FixInputs, GenerateInputs, PromptBuilder,
};

/// Call the LLM, retrying service errors with exponential backoff.
///
/// Backoff sleeps wake early on cancellation.
pub fn generate_with_retry(
    llm: &dyn LlmClient,
    prompt: &str,
    ctx: &ToolContext,
) -> anyhow::Result<String> {
    let mut attempt = 0;
    loop {
        match llm.generate(prompt, ctx.timeout, &ctx.cancel) {
            Ok(text) => return Ok(text),
            Err(err) if err.is_retryable() && attempt < ctx.retry.retries => {
                attempt += 1;
                let delay = backoff_delay(attempt, ctx.retry.base, ctx.retry.max);
                warn!(err = %err, attempt, delay_ms = delay.as_millis() as u64, "llm call failed, retrying");
                if !ctx.cancel.sleep(delay) {
                    return Err(Cancelled.into());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn code_from(response: &str) -> anyhow::Result<String> {
    let code = extract_code(response);
    if code.trim().is_empty() {
        return Err(LlmError::Unusable("response contained no code".to_string()).into());
    }
    Ok(code)
}

fn field(params: &Params, key: &str) -> Value {
    params.get(key).cloned().unwrap_or(Value::Null)
}

fn list_param<T: DeserializeOwned>(params: &Params, key: &str) -> anyhow::Result<Vec<T>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .with_context(|| format!("parameter `{key}` has an unexpected shape")),
    }
}

#[derive(serde::Deserialize)]
struct DependencyParam {
    symbol: String,
    score: f64,
    #[serde(default)]
    path: Option<String>,
}

#[derive(serde::Deserialize)]
struct ExampleParam {
    source_path: String,
    test_path: String,
    test_content: String,
}

/// Generates a test file for a target source.
pub struct GenerateTest {
    llm: Arc<dyn LlmClient>,
    prompts: PromptBuilder,
    language: String,
    framework: String,
}

impl GenerateTest {
    pub fn new(caps: &Capabilities, config: &GenerationConfig) -> Self {
        Self {
            llm: Arc::clone(&caps.llm),
            prompts: caps.prompts.clone(),
            language: config.language.clone(),
            framework: config.framework.clone(),
        }
    }
}

impl Tool for GenerateTest {
    fn id(&self) -> ToolId {
        ToolId::GenerateTest
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["target_path", "source", "test_path"]
    }

    fn run(&self, params: &Params, ctx: &ToolContext) -> anyhow::Result<Params> {
        let dependencies = list_param::<DependencyParam>(params, "dependencies")?
            .into_iter()
            .map(|d| DependencyContext {
                symbol: d.symbol,
                score: format!("{:.2}", d.score),
                path: d.path,
            })
            .collect();
        let examples = list_param::<ExampleParam>(params, "examples")?
            .into_iter()
            .map(|e| ExampleContext {
                source_path: e.source_path,
                test_path: e.test_path,
                test_content: e.test_content,
            })
            .collect();
        let inputs = GenerateInputs {
            language: self.language.clone(),
            framework: self.framework.clone(),
            target_path: str_param(params, "target_path")?.to_string(),
            test_path: str_param(params, "test_path")?.to_string(),
            source: str_param(params, "source")?.to_string(),
            strategy: opt_str(params, "strategy").unwrap_or("create").to_string(),
            complexity: opt_str(params, "complexity").unwrap_or("medium").to_string(),
            approach: opt_str(params, "approach").unwrap_or("standard").to_string(),
            existing_test: opt_str(params, "existing_test").map(str::to_string),
            dependencies,
            examples,
        };
        let prompt = self.prompts.build_generate(&inputs)?;
        debug!(prompt_bytes = prompt.len(), "generating test");
        let response = generate_with_retry(self.llm.as_ref(), &prompt, ctx)?;
        let mut out = Params::new();
        out.insert("test_code".to_string(), Value::String(code_from(&response)?));
        Ok(out)
    }
}

/// Fix generation in two modes.
///
/// - `analyze`: one `error` in, `analysis` (full response) and `fixed_code` out.
/// - `comprehensive`: all `errors` (plus optional `analyses`) in, one
///   `fixed_code` out.
pub struct GenerateFix {
    llm: Arc<dyn LlmClient>,
    prompts: PromptBuilder,
    language: String,
}

impl GenerateFix {
    pub fn new(caps: &Capabilities, config: &GenerationConfig) -> Self {
        Self {
            llm: Arc::clone(&caps.llm),
            prompts: caps.prompts.clone(),
            language: config.language.clone(),
        }
    }
}

impl Tool for GenerateFix {
    fn id(&self) -> ToolId {
        ToolId::GenerateFix
    }

    fn validate(&self, params: &Params) -> Result<(), ToolError> {
        let tool = self.id();
        require_string(tool, "mode", params)?;
        require_string(tool, "test_code", params)?;
        require_string(tool, "test_path", params)?;
        match opt_str(params, "mode") {
            Some("analyze") => {
                require_present(tool, &["error"], params)?;
                let parsed: Result<ParsedError, _> =
                    serde_json::from_value(field(params, "error"));
                parsed.map(|_| ()).map_err(|e| ToolError::InvalidParameter {
                    tool,
                    key: "error",
                    reason: e.to_string(),
                })
            }
            Some("comprehensive") => {
                require_present(tool, &["errors"], params)?;
                let parsed: Result<Vec<ParsedError>, _> =
                    serde_json::from_value(field(params, "errors"));
                match parsed {
                    Ok(errors) if !errors.is_empty() => Ok(()),
                    Ok(_) => Err(ToolError::InvalidParameter {
                        tool,
                        key: "errors",
                        reason: "must not be empty".to_string(),
                    }),
                    Err(e) => Err(ToolError::InvalidParameter {
                        tool,
                        key: "errors",
                        reason: e.to_string(),
                    }),
                }
            }
            other => Err(ToolError::InvalidParameter {
                tool,
                key: "mode",
                reason: format!("expected `analyze` or `comprehensive`, got {other:?}"),
            }),
        }
    }

    fn run(&self, params: &Params, ctx: &ToolContext) -> anyhow::Result<Params> {
        let inputs = FixInputs {
            language: &self.language,
            test_path: str_param(params, "test_path")?,
            test_code: str_param(params, "test_code")?,
            source: opt_str(params, "source"),
        };
        let mut out = Params::new();
        match str_param(params, "mode")? {
            "analyze" => {
                let error: ParsedError = serde_json::from_value(field(params, "error"))
                    .context("decode error parameter")?;
                let prompt = self.prompts.build_fix_error(&inputs, &error)?;
                let response = generate_with_retry(self.llm.as_ref(), &prompt, ctx)?;
                out.insert("fixed_code".to_string(), Value::String(extract_code(&response)));
                out.insert("analysis".to_string(), Value::String(response));
            }
            "comprehensive" => {
                let errors: Vec<ParsedError> = serde_json::from_value(field(params, "errors"))
                    .context("decode errors parameter")?;
                let analyses: Vec<String> = list_param(params, "analyses")?;
                let prompt = self.prompts.build_fix_all(&inputs, &errors, &analyses)?;
                let response = generate_with_retry(self.llm.as_ref(), &prompt, ctx)?;
                out.insert("fixed_code".to_string(), Value::String(code_from(&response)?));
            }
            other => bail!("unknown fix mode {other:?}"),
        }
        Ok(out)
    }
}
