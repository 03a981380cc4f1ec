//! LLM-driven unit test generation and repair.
//!
//! A goal (index, analyze, generate, fix) is pursued by a fixed sequence of
//! steps. The crate keeps a strict separation:
//!
//! - **[`core`]**: pure, deterministic logic (state, goals, ranking, index
//!   construction, test paths). No I/O.
//! - **[`io`]**: capabilities with side effects (LLM, build, file system,
//!   parsers, index store) and their default adapters.
//! - **[`tools`]**: one boundary-safe adapter per capability call, behind a
//!   registry built once per process.
//!
//! Orchestration ([`agents`], [`coordinator`], [`fix_loop`], [`pool`]) plans
//! actions, dispatches them through the registry and folds results into
//! copy-on-write [`core::state::State`] values.

pub mod agents;
pub mod cancel;
pub mod coordinator;
pub mod core;
pub mod exit_codes;
pub mod fix_loop;
pub mod io;
pub mod logging;
pub mod pool;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
