//! Single-step coding agent.
//!
//! One invocation asks a model for an action plan, validates it, applies its
//! actions (read, write, run, emit) to a git workspace under a command policy
//! and reports every phase as an event. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan validation, command policy,
//!   value types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting ports and their adapters (model HTTP clients,
//!   filesystem and git, process execution, event output, state directory).
//!
//! [`step`] coordinates core logic with the ports; [`plan_check`] backs the
//! offline `plan-check` command and [`doctor`] the setup diagnostics.

pub mod core;
pub mod doctor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan_check;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
