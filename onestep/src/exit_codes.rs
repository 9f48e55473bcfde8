//! Stable exit codes for onestep CLI commands.

/// Command succeeded, or the step finished with `success = true`.
pub const OK: i32 = 0;
/// The step ran but was unsuccessful, or `plan-check` rejected the plan.
pub const FAILED: i32 = 1;
/// Setup or usage error: not a git repository, bad config, unknown provider,
/// missing API key, unreadable input.
pub const INVALID: i32 = 2;
