//! Build/test execution capability.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::index::module_of;
use crate::io::config::BuildConfig;
use crate::io::process::run_command_with_timeout;

/// What to build and test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Test file to run, repository-relative.
    pub test_file: String,
    /// Source file under test, if known.
    pub target: Option<String>,
}

impl BuildTarget {
    /// Fully-qualified test class inferred from the test path
    /// (`src/test/kotlin/a/b/FooTest.kt` -> `a.b.FooTest`).
    pub fn test_class(&self) -> String {
        let module = module_of(&self.test_file);
        let stem = Path::new(&self.test_file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if module.is_empty() {
            stem
        } else {
            format!("{module}.{stem}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Combined stdout/stderr text.
    pub output: String,
    pub passed: bool,
    pub timed_out: bool,
    pub cancelled: bool,
}

pub trait BuildRunner: Send + Sync {
    /// Run the build. `Err` means the tooling itself could not run; a failing
    /// build is `Ok` with `passed=false`.
    fn run(
        &self,
        target: &BuildTarget,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<BuildOutput>;
}

/// Runs the configured build command from the repository root.
#[derive(Debug, Clone)]
pub struct CommandBuildRunner {
    workdir: PathBuf,
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandBuildRunner {
    pub fn new(workdir: impl Into<PathBuf>, config: &BuildConfig) -> Self {
        Self {
            workdir: workdir.into(),
            command: config.command.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn render_args(&self, target: &BuildTarget) -> Vec<String> {
        let test_class = target.test_class();
        let source = target.target.as_deref().unwrap_or_default();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{test_file}", &target.test_file)
                    .replace("{test_class}", &test_class)
                    .replace("{target}", source)
            })
            .collect()
    }
}

impl BuildRunner for CommandBuildRunner {
    #[instrument(skip_all, fields(test_file = %target.test_file, timeout_secs = timeout.as_secs()))]
    fn run(
        &self,
        target: &BuildTarget,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<BuildOutput> {
        let args = self.render_args(target);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("build command is empty"))?;
        info!(program = %program, "running build");
        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.workdir);

        let output =
            run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes, cancel)?;
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "build timed out");
        }
        Ok(BuildOutput {
            output: output.combined("build"),
            passed: output.success(),
            timed_out: output.timed_out,
            cancelled: output.cancelled,
        })
    }
}
