//! Stable exit codes for agent CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid config, corpus, arguments or other errors.
pub const INVALID: i32 = 1;
/// `agent parse` found no action whose prefix matches the input.
pub const NO_MATCH: i32 = 2;
