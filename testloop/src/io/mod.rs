//! Capabilities the loop consumes and their default adapters.
//!
//! Every capability is a `Send + Sync` trait so per-file loops can share one
//! set across worker threads. Tests substitute scripted implementations.

pub mod build;
pub mod code_parser;
pub mod config;
pub mod deps;
pub mod error_parser;
pub mod fs;
pub mod index_store;
pub mod llm;
pub mod process;
pub mod prompt;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use self::build::{BuildRunner, CommandBuildRunner};
use self::code_parser::{CodeParser, RegexCodeParser};
use self::config::LoopConfig;
use self::deps::{DependencyResolver, IndexResolver};
use self::error_parser::{ErrorParser, RegexErrorParser};
use self::fs::{FileSystem, LocalFs};
use self::index_store::{IndexStore, JsonIndexStore};
use self::llm::{CommandLlm, LlmClient};
use self::prompt::PromptBuilder;

/// The full capability set handed to the tool registry.
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Arc<dyn LlmClient>,
    pub build: Arc<dyn BuildRunner>,
    pub error_parser: Arc<dyn ErrorParser>,
    pub fs: Arc<dyn FileSystem>,
    pub code_parser: Arc<dyn CodeParser>,
    pub deps: Arc<dyn DependencyResolver>,
    pub index_store: Arc<dyn IndexStore>,
    pub prompts: PromptBuilder,
}

impl Capabilities {
    /// Default adapters rooted at a local repository.
    pub fn local(root: &Path, config: &LoopConfig) -> Result<Self> {
        let index_store: Arc<dyn IndexStore> =
            Arc::new(JsonIndexStore::new(root.join(&config.index.path)));
        Ok(Self {
            llm: Arc::new(CommandLlm::new(root, &config.llm)),
            build: Arc::new(CommandBuildRunner::new(root, &config.build)),
            error_parser: Arc::new(RegexErrorParser::new()?),
            fs: Arc::new(LocalFs::new(root, &config.index.exclude_dirs)),
            code_parser: Arc::new(RegexCodeParser::new()?),
            deps: Arc::new(IndexResolver::new(Arc::clone(&index_store))),
            index_store,
            prompts: PromptBuilder::new(config.generation.prompt_budget_bytes)?,
        })
    }
}
