pub mod path;
pub mod rules;
pub mod validator;

pub use path::{PathError, PathResolver, ResolvedPath};
pub use rules::{AllowRule, DenyRule, Rule, RuleKind, RuleSet, RuleSetError};
pub use validator::{AllowedCommand, CommandValidator, MatchedRule, ValidationDecision, ValidationError};

/// Host environment variables forwarded to child processes
///
/// Nothing outside this list reaches a spawned command or the audit log.
/// Adding a variable here requires a security review: anything listed is
/// visible to every allowed command.
pub const PASSTHROUGH_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TERM",
    "SHELL",
    "PYTHONPATH",
    "VIRTUAL_ENV",
    "NODE_ENV",
    "NPM_CONFIG_PREFIX",
    "CARGO_HOME",
    "RUSTUP_HOME",
];

/// Snapshot of the allow-listed variables from the current process
pub fn sanitized_env() -> Vec<(String, String)> {
    filter_env(std::env::vars())
}

/// Keep only allow-listed variables, in list order
pub fn filter_env<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut kept: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(key, _)| PASSTHROUGH_ENV_VARS.contains(&key.as_str()))
        .collect();

    kept.sort_by_key(|(key, _)| {
        PASSTHROUGH_ENV_VARS
            .iter()
            .position(|allowed| *allowed == key)
            .unwrap_or(usize::MAX)
    });
    kept
}
