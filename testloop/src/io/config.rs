//! Loop configuration stored in `testloop.toml` at the repository root.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::StepName;

pub const CONFIG_FILE: &str = "testloop.toml";

/// Loop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values in the `Default` impls below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    pub coordinator: CoordinatorConfig,
    pub fix_loop: FixLoopConfig,
    pub tools: ToolsConfig,
    pub build: BuildConfig,
    pub llm: LlmConfig,
    pub index: IndexConfig,
    pub generation: GenerationConfig,
}

/// What the coordinator does when a step exhausts its invocations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run and return the failed state.
    #[default]
    Abort,
    /// Move on to the next step anyway.
    Advance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_invocations: StepCeilings,
    pub failure_policy: FailurePolicy,
    /// Upper bound on concurrent per-file loops.
    pub workers: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_invocations: StepCeilings::default(),
            failure_policy: FailurePolicy::Abort,
            workers: 4,
        }
    }
}

/// How many times each step kind may be invoked before giving up.
///
/// Analyze and Generate make progress over several invocations, so their
/// ceilings include the passes they need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StepCeilings {
    pub index: u32,
    pub analyze: u32,
    pub generate: u32,
    pub fix: u32,
}

impl Default for StepCeilings {
    fn default() -> Self {
        Self {
            index: 2,
            analyze: 4,
            generate: 5,
            fix: 1,
        }
    }
}

impl StepCeilings {
    pub fn for_step(&self, step: StepName) -> u32 {
        match step {
            StepName::Index => self.index,
            StepName::Analyze => self.analyze,
            StepName::Generate => self.generate,
            StepName::Fix => self.fix,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixLoopConfig {
    /// Build/verify cycles before the loop ends in `Exhausted`.
    pub max_attempts: u32,
    /// Errors analyzed individually per attempt.
    pub max_errors_per_attempt: usize,
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_errors_per_attempt: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-call timeout for LLM tools.
    pub timeout_secs: u64,
    /// Extra attempts after an LLM service error.
    pub llm_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10 * 60,
            llm_retries: 2,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build+test command. `{test_file}`, `{test_class}` and `{target}` are
    /// substituted in each argument.
    pub command: Vec<String>,
    /// A build still running after this long is killed.
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "./gradlew".to_string(),
                "test".to_string(),
                "--tests".to_string(),
                "{test_class}".to_string(),
            ],
            timeout_secs: 15 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Command that reads a prompt on stdin and prints the completion.
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Where the repository index is persisted, relative to the root.
    pub path: String,
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: ".testloop/index.json".to_string(),
            extensions: ["kt", "java", "py", "rs", "ts"]
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            exclude_dirs: [".git", ".gradle", ".idea", ".testloop", "build", "target", "node_modules"]
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    pub language: String,
    pub framework: String,
    /// Similar tested files included in generation prompts.
    pub max_examples: usize,
    /// Rendered prompts are trimmed to this size, dropping optional
    /// sections first.
    pub prompt_budget_bytes: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            language: "Kotlin".to_string(),
            framework: "JUnit5 with MockK".to_string(),
            max_examples: 3,
            prompt_budget_bytes: 60_000,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tools.timeout_secs == 0 {
            return Err(anyhow!("tools.timeout_secs must be > 0"));
        }
        if self.tools.backoff_max_ms < self.tools.backoff_base_ms {
            return Err(anyhow!("tools.backoff_max_ms must be >= tools.backoff_base_ms"));
        }
        if self.fix_loop.max_attempts == 0 {
            return Err(anyhow!("fix_loop.max_attempts must be > 0"));
        }
        if self.fix_loop.max_errors_per_attempt == 0 {
            return Err(anyhow!("fix_loop.max_errors_per_attempt must be > 0"));
        }
        if self.coordinator.workers == 0 {
            return Err(anyhow!("coordinator.workers must be > 0"));
        }
        let ceilings = &self.coordinator.max_invocations;
        for step in [
            StepName::Index,
            StepName::Analyze,
            StepName::Generate,
            StepName::Fix,
        ] {
            if ceilings.for_step(step) == 0 {
                return Err(anyhow!("coordinator.max_invocations.{step} must be > 0"));
            }
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.build.output_limit_bytes == 0 {
            return Err(anyhow!("build.output_limit_bytes must be > 0"));
        }
        if self.llm.output_limit_bytes == 0 {
            return Err(anyhow!("llm.output_limit_bytes must be > 0"));
        }
        if self.build.command.first().is_none_or(|c| c.trim().is_empty()) {
            return Err(anyhow!("build.command must be a non-empty array"));
        }
        if self.llm.command.first().is_none_or(|c| c.trim().is_empty()) {
            return Err(anyhow!("llm.command must be a non-empty array"));
        }
        if self.generation.prompt_budget_bytes == 0 {
            return Err(anyhow!("generation.prompt_budget_bytes must be > 0"));
        }
        if self.index.path.trim().is_empty() {
            return Err(anyhow!("index.path must not be empty"));
        }
        if self.index.extensions.is_empty() {
            return Err(anyhow!("index.extensions must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
