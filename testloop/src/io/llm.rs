//! LLM capability.
//!
//! The [`LlmClient`] trait decouples the loop from the completion backend.
//! [`CommandLlm`] pipes the prompt into a configured command (by default
//! `codex exec -`) and reads the completion from stdout. Tests use scripted
//! clients that return predetermined completions without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::io::config::LlmConfig;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The backend is unreachable, failed, or timed out. Retryable.
    #[error("llm service error: {0}")]
    Service(String),
    /// The backend answered with something the loop cannot use.
    #[error("llm returned an unusable response: {0}")]
    Unusable(String),
    #[error("llm call cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Service(_))
    }
}

pub trait LlmClient: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<String, LlmError>;
}

/// Completion backend driven by an external command.
#[derive(Debug, Clone)]
pub struct CommandLlm {
    workdir: PathBuf,
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandLlm {
    pub fn new(workdir: impl Into<PathBuf>, config: &LlmConfig) -> Self {
        Self {
            workdir: workdir.into(),
            command: config.command.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl LlmClient for CommandLlm {
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), prompt_bytes = prompt.len()))]
    fn generate(
        &self,
        prompt: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<String, LlmError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(LlmError::Service("llm command is empty".to_string()));
        };
        info!(program = %program, "starting llm command");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            timeout,
            self.output_limit_bytes,
            cancel,
        )
        .map_err(|e| LlmError::Service(format!("{e:#}")))?;

        if output.cancelled {
            return Err(LlmError::Cancelled);
        }
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "llm command timed out");
            return Err(LlmError::Service(format!("timed out after {timeout:?}")));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "llm command failed");
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Service(format!(
                "exit status {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.trim().is_empty() {
            return Err(LlmError::Unusable("empty completion".to_string()));
        }
        debug!(completion_bytes = text.len(), "llm command completed");
        Ok(text)
    }
}
