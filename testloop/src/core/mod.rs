//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod code_block;
pub mod goal;
pub mod index;
pub mod keys;
pub mod ranking;
pub mod state;
pub mod state_manager;
pub mod test_path;
pub mod types;
