//! Scripted capabilities and a temp-dir workspace for tests.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::cancel::CancelToken;
use crate::coordinator::Coordinator;
use crate::core::types::ParsedError;
use crate::io::Capabilities;
use crate::io::build::{BuildOutput, BuildRunner, BuildTarget};
use crate::io::code_parser::RegexCodeParser;
use crate::io::config::LoopConfig;
use crate::io::deps::IndexResolver;
use crate::io::error_parser::{ErrorParser, RegexErrorParser};
use crate::io::fs::LocalFs;
use crate::io::index_store::{IndexStore, JsonIndexStore};
use crate::io::llm::{LlmClient, LlmError};
use crate::io::prompt::PromptBuilder;
use crate::tools::ToolRegistry;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum BuildStep {
    Finished { output: String, passed: bool },
    TimedOut(String),
    ToolingError(String),
}

/// Build runner that replays queued results and records every target.
#[derive(Default)]
pub struct ScriptedBuildRunner {
    script: Mutex<VecDeque<BuildStep>>,
    calls: Mutex<Vec<BuildTarget>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedBuildRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, step: BuildStep) -> &Self {
        locked(&self.script).push_back(step);
        self
    }

    pub fn push_pass(&self, output: &str) -> &Self {
        self.push(BuildStep::Finished {
            output: output.to_string(),
            passed: true,
        })
    }

    pub fn push_fail(&self, output: &str) -> &Self {
        self.push(BuildStep::Finished {
            output: output.to_string(),
            passed: false,
        })
    }

    /// The build was killed at its timeout with partial output.
    pub fn push_timeout(&self, partial_output: &str) -> &Self {
        self.push(BuildStep::TimedOut(partial_output.to_string()))
    }

    /// The build tooling itself fails to run.
    pub fn push_error(&self, message: &str) -> &Self {
        self.push(BuildStep::ToolingError(message.to_string()))
    }

    pub fn calls(&self) -> Vec<BuildTarget> {
        locked(&self.calls).clone()
    }

    /// Timeout passed to each call, in call order.
    pub fn timeouts(&self) -> Vec<Duration> {
        locked(&self.timeouts).clone()
    }
}

impl BuildRunner for ScriptedBuildRunner {
    fn run(
        &self,
        target: &BuildTarget,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<BuildOutput> {
        locked(&self.calls).push(target.clone());
        locked(&self.timeouts).push(timeout);
        let mut out = BuildOutput {
            output: String::new(),
            passed: false,
            timed_out: false,
            cancelled: false,
        };
        if cancel.is_cancelled() {
            out.cancelled = true;
            return Ok(out);
        }
        let next = locked(&self.script)
            .pop_front()
            .ok_or_else(|| anyhow!("build script exhausted"))?;
        match next {
            BuildStep::Finished { output, passed } => {
                out.output = output;
                out.passed = passed;
            }
            BuildStep::TimedOut(output) => {
                out.output = output;
                out.timed_out = true;
            }
            BuildStep::ToolingError(message) => return Err(anyhow!(message)),
        }
        Ok(out)
    }
}

/// LLM that replays queued replies and records every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: &str) -> &Self {
        locked(&self.script).push_back(Ok(reply.to_string()));
        self
    }

    pub fn push_error(&self, error: LlmError) -> &Self {
        locked(&self.script).push_back(Err(error));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        locked(&self.prompts).clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(
        &self,
        prompt: &str,
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<String, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        locked(&self.prompts).push(prompt.to_string());
        locked(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Service("llm script exhausted".to_string())))
    }
}

/// Error parser that replays queued error lists; empty once exhausted.
#[derive(Default)]
pub struct ScriptedErrorParser {
    script: Mutex<VecDeque<Result<Vec<ParsedError>, String>>>,
}

impl ScriptedErrorParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, errors: Vec<ParsedError>) -> &Self {
        locked(&self.script).push_back(Ok(errors));
        self
    }

    /// The parser itself fails on the next output.
    pub fn push_error(&self, message: &str) -> &Self {
        locked(&self.script).push_back(Err(message.to_string()));
        self
    }
}

impl ErrorParser for ScriptedErrorParser {
    fn parse(&self, _raw_output: &str) -> Result<Vec<ParsedError>> {
        match locked(&self.script).pop_front() {
            Some(next) => next.map_err(|message| anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// A repository in a temp dir wired to scripted LLM and build capabilities.
///
/// File-system, code parsing and the index store are the real adapters.
pub struct TestWorkspace {
    dir: TempDir,
    pub config: LoopConfig,
    pub build: Arc<ScriptedBuildRunner>,
    pub llm: Arc<ScriptedLlm>,
    pub error_parser: Arc<dyn ErrorParser>,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let mut config = LoopConfig::default();
        config.tools.backoff_base_ms = 1;
        config.tools.backoff_max_ms = 2;
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            config,
            build: Arc::new(ScriptedBuildRunner::new()),
            llm: Arc::new(ScriptedLlm::new()),
            error_parser: Arc::new(RegexErrorParser::new().expect("error parser")),
        }
    }

    pub fn with_error_parser(mut self, parser: Arc<dyn ErrorParser>) -> Self {
        self.error_parser = parser;
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).expect("read file")
    }

    pub fn capabilities(&self) -> Capabilities {
        let root = self.root();
        let index_store: Arc<dyn IndexStore> =
            Arc::new(JsonIndexStore::new(root.join(&self.config.index.path)));
        Capabilities {
            llm: self.llm.clone(),
            build: self.build.clone(),
            error_parser: Arc::clone(&self.error_parser),
            fs: Arc::new(LocalFs::new(root, &self.config.index.exclude_dirs)),
            code_parser: Arc::new(RegexCodeParser::new().expect("code parser")),
            deps: Arc::new(IndexResolver::new(Arc::clone(&index_store))),
            index_store,
            prompts: PromptBuilder::new(self.config.generation.prompt_budget_bytes)
                .expect("prompt templates"),
        }
    }

    pub fn registry(&self) -> ToolRegistry {
        ToolRegistry::standard(&self.capabilities(), &self.config)
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(Arc::new(self.registry()), self.config.clone())
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
