//! Command policy gate for `run` actions.
//!
//! Two tiers: a fixed deny set of destructive or networked base commands that
//! always wins, then a prefix allowlist taken from the run's [`Policy`].

use crate::core::types::Policy;

/// Base commands that are never allowed, whatever the allowlist says.
pub const DENIED_BASE_COMMANDS: [&str; 14] = [
    "rm", "mv", "dd", "mkfs", "shutdown", "reboot", "poweroff", "curl", "wget", "nc", "telnet",
    "ssh", "scp", "rsync",
];

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First whitespace-delimited token, lower-cased.
pub fn base_command(command: &str) -> Option<String> {
    command
        .split_whitespace()
        .next()
        .map(|token| token.to_lowercase())
}

/// True if `command` may run under `policy`.
pub fn command_allowed(command: &str, policy: &Policy) -> bool {
    let normalized = normalize_command(command);
    let Some(base) = base_command(&normalized) else {
        return false;
    };
    if DENIED_BASE_COMMANDS.contains(&base.as_str()) {
        return false;
    }
    policy.allow_commands.iter().any(|entry| {
        let allowed = normalize_command(entry);
        if allowed.is_empty() {
            return false;
        }
        normalized == allowed
            || normalized
                .strip_prefix(allowed.as_str())
                .is_some_and(|rest| rest.starts_with(' '))
    })
}
