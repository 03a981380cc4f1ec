//! `testloop`: generate and repair unit tests with an LLM in the loop.
//!
//! Reads `testloop.toml` from the current directory (the repository root)
//! unless `--config` points elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use testloop::coordinator::Coordinator;
use testloop::core::goal::Goal;
use testloop::core::keys;
use testloop::core::state::{Data, State};
use testloop::exit_codes;
use testloop::io::config::{CONFIG_FILE, LoopConfig, load_config, write_config};
use testloop::logging;
use testloop::pool::Job;

#[derive(Parser)]
#[command(
    name = "testloop",
    version,
    about = "LLM-driven unit test generation and repair"
)]
struct Cli {
    /// Config file (defaults to `testloop.toml` in the current directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log progress at `info` unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Build the repository index used for example retrieval.
    Index {
        /// Write the final state as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Generate a passing test for each target (analyze, generate, fix).
    Generate {
        /// Source file to test. Repeat for several files.
        #[arg(long = "target", required = true, num_args = 1..)]
        targets: Vec<String>,
        /// Test file path (single target only). Derived from the target when omitted.
        #[arg(long)]
        test_file: Option<String>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Repair a failing test.
    Fix {
        #[arg(long)]
        target: String,
        #[arg(long)]
        test_file: String,
        /// Captured output of the failing build; the loop builds first when omitted.
        #[arg(long)]
        build_output: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = std::env::current_dir().context("resolve current directory")?;
    let config_path = cli.config.unwrap_or_else(|| root.join(CONFIG_FILE));

    if let Command::Init { force } = cli.command {
        return cmd_init(&config_path, force);
    }

    let config = load_config(&config_path)?;
    let coordinator = Coordinator::local(&root, config)?;
    match cli.command {
        Command::Init { .. } => Ok(exit_codes::OK),
        Command::Index { report } => {
            let goal = Goal::for_name("index")?;
            let state = coordinator.run_goal(&goal, Some(seed(&root, coordinator.config())));
            finish(&[("index", state)], report.as_deref())
        }
        Command::Generate {
            targets,
            test_file,
            report,
        } => cmd_generate(&coordinator, &root, targets, test_file, report.as_deref()),
        Command::Fix {
            target,
            test_file,
            build_output,
            report,
        } => {
            let mut initial = seed(&root, coordinator.config());
            initial.insert(keys::TARGET_FILE.to_string(), Value::String(target.clone()));
            initial.insert(keys::TEST_FILE.to_string(), Value::String(test_file));
            if let Some(path) = build_output {
                let output = fs::read_to_string(&path)
                    .with_context(|| format!("read build output {}", path.display()))?;
                initial.insert(keys::BUILD_OUTPUT.to_string(), Value::String(output));
            }
            let goal = Goal::for_name("fix")?;
            let state = coordinator.run_goal(&goal, Some(initial));
            finish(&[(target.as_str(), state)], report.as_deref())
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &LoopConfig::default())?;
    println!("{}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_generate(
    coordinator: &Coordinator,
    root: &Path,
    targets: Vec<String>,
    test_file: Option<String>,
    report: Option<&Path>,
) -> Result<i32> {
    if test_file.is_some() && targets.len() > 1 {
        bail!("--test-file can only be used with a single --target");
    }
    let goal = Goal::for_name("generate")?;
    let jobs: Vec<Job> = targets
        .iter()
        .map(|target| {
            let mut initial = seed(root, coordinator.config());
            initial.insert(keys::TARGET_FILE.to_string(), Value::String(target.clone()));
            if let Some(test_file) = &test_file {
                initial.insert(keys::TEST_FILE.to_string(), Value::String(test_file.clone()));
            }
            Job {
                goal: goal.clone(),
                initial,
            }
        })
        .collect();
    let states = coordinator.run_many(jobs);
    let labelled: Vec<(&str, State)> = targets.iter().map(String::as_str).zip(states).collect();
    finish(&labelled, report)
}

/// Seed data shared by every goal.
fn seed(root: &Path, config: &LoopConfig) -> Data {
    let mut data = Data::new();
    data.insert(
        keys::REPO_ROOT.to_string(),
        Value::String(root.display().to_string()),
    );
    data.insert(
        keys::LANGUAGE.to_string(),
        Value::String(config.generation.language.clone()),
    );
    data.insert(
        keys::FRAMEWORK.to_string(),
        Value::String(config.generation.framework.clone()),
    );
    data
}

/// Print one line per run, write the report, and pick the exit code.
fn finish(runs: &[(&str, State)], report: Option<&Path>) -> Result<i32> {
    for (label, state) in runs {
        if state.success() {
            println!("{label}: achieved");
        } else {
            let reason = state.get_str(keys::ERROR).unwrap_or("goal not achieved");
            println!("{label}: not achieved ({reason})");
        }
    }
    if let Some(path) = report {
        let payload: Value = if let [(_, state)] = runs {
            state.to_json()
        } else {
            Value::Array(runs.iter().map(|(_, state)| state.to_json()).collect())
        };
        write_json(path, &payload)?;
    }
    if runs.iter().all(|(_, state)| state.success()) {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::NOT_ACHIEVED)
    }
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["testloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_generate_with_several_targets() {
        let cli = Cli::parse_from([
            "testloop",
            "--verbose",
            "generate",
            "--target",
            "src/main/kotlin/A.kt",
            "--target",
            "src/main/kotlin/B.kt",
        ]);
        assert!(cli.verbose);
        let Command::Generate { targets, test_file, .. } = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(targets.len(), 2);
        assert!(test_file.is_none());
    }

    #[test]
    fn generate_requires_a_target() {
        assert!(Cli::try_parse_from(["testloop", "generate"]).is_err());
    }

    #[test]
    fn parse_fix_with_build_output() {
        let cli = Cli::parse_from([
            "testloop",
            "fix",
            "--target",
            "src/main/kotlin/A.kt",
            "--test-file",
            "src/test/kotlin/ATest.kt",
            "--build-output",
            "build.log",
            "--config",
            "alt.toml",
        ]);
        assert_eq!(cli.config.as_deref(), Some(Path::new("alt.toml")));
        assert!(matches!(cli.command, Command::Fix { build_output: Some(_), .. }));
    }

    #[test]
    fn finish_maps_outcomes_to_exit_codes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = temp.path().join("report.json");
        let ok = State::default().with_success(true);
        let failed = State::default().with_error("boom");

        let code = finish(&[("a", ok.clone())], Some(&report)).expect("finish");
        assert_eq!(code, exit_codes::OK);
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&report).expect("read")).expect("json");
        assert_eq!(written["success"], true);

        let code = finish(&[("a", ok), ("b", failed)], Some(&report)).expect("finish");
        assert_eq!(code, exit_codes::NOT_ACHIEVED);
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&report).expect("read")).expect("json");
        assert_eq!(written.as_array().map(Vec::len), Some(2));
    }
}
