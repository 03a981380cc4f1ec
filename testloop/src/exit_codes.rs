//! Stable exit codes for testloop CLI commands.

/// The goal was achieved (or the command had nothing to achieve).
pub const OK: i32 = 0;
/// Invalid invocation, configuration, or other setup error.
pub const INVALID: i32 = 1;
/// The run finished but the goal was not achieved.
pub const NOT_ACHIEVED: i32 = 2;
