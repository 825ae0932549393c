//! Stable exit codes for jarvis CLI commands.

/// Command succeeded; `run` ended with a shutdown.
pub const OK: i32 = 0;
/// Invalid layout, config or plan, or any other error.
pub const INVALID: i32 = 1;
/// `jarvis run` stopped because the user declined an action.
pub const DECLINED: i32 = 2;
/// `jarvis run` reached `max_iterations` without a shutdown.
pub const MAX_ITERATIONS: i32 = 3;
