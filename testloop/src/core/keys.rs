//! Well-known state keys shared between steps.
//!
//! Steps communicate only through [`State`](crate::core::state::State), so the
//! key names form the contract between them.

// Data keys.
pub const SUCCESS: &str = "success";
pub const ERROR: &str = "error";
pub const CANCELLED: &str = "cancelled";
pub const GOAL: &str = "goal";
pub const REPO_ROOT: &str = "repo_root";
pub const TARGET_FILE: &str = "target_file";
pub const TARGET_CONTENT: &str = "target_content";
pub const TEST_FILE: &str = "test_file";
pub const EXISTING_TEST: &str = "existing_test";
pub const BUILD_OUTPUT: &str = "build_output";
pub const LANGUAGE: &str = "language";
pub const FRAMEWORK: &str = "framework";

pub const INDEXED_FILES: &str = "indexed_files";
pub const INDEX_COMPLETE: &str = "index_complete";

pub const MODULE: &str = "module";
pub const IMPORTS: &str = "imports";
pub const USAGE_WEIGHTS: &str = "usage_weights";
pub const COMPLEXITY: &str = "complexity";
pub const APPROACH: &str = "approach";
pub const HAS_GOOD_EXAMPLES: &str = "has_good_examples";
pub const ANALYSIS_COMPLETE: &str = "analysis_complete";

pub const STRATEGY: &str = "strategy";
pub const TEST_CODE_GENERATED: &str = "test_code_generated";
pub const TEST_FILE_WRITTEN: &str = "test_file_written";

pub const FIX_COMPLETE: &str = "fix_complete";
pub const FIX_PHASE: &str = "fix_phase";
pub const FIX_ATTEMPTS: &str = "fix_attempts";
pub const FIX_FATAL_REASON: &str = "fix_fatal_reason";
pub const TEST_FIXED: &str = "test_fixed";

// Artifact keys.
pub const GENERATED_TEST: &str = "generated_test";
pub const EXISTING_TEST_CONTENT: &str = "existing_test_content";
pub const ERRORS: &str = "errors";
pub const DEPENDENCIES: &str = "dependencies";
pub const SIMILAR_EXAMPLES: &str = "similar_examples";
pub const FIX_HISTORY: &str = "fix_history";
